use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Args, Parser, Subcommand};
use colibrimt::train::MemoryBackend;
use colibrimt::{
    abstract_skipgrams, open_phrase_table, run_decoder, train_classifiers, AlignmentModel,
    ClassifierConfig, ContextExtractor, ContextMoses, DecodeOptions, DecoderCache,
    FeatureConfiguration, IndexedCorpus, IndexedPatternModel, KeywordOptions, KeywordStore,
    MosesConfig, Pattern, PatternModelInterface, PatternModelOptions, PatternSet,
    PhraseTableOptions, Result, ScoreHandling, SkipgramOptions, TrainingSetBuilder, Vocabulary,
    Weighting,
};
use env_logger::Env;

#[derive(Parser, Debug)]
#[command(version, about = "Phrase alignment models and context-aware translation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a Moses phrase table into an alignment model
    Phrasetable2alignmodel(ConvertArgs),
    /// View, normalize or export an alignment model
    Alignmodel(ViewArgs),
    /// Add skip-gram generalizations to an alignment model
    Extractskipgrams(SkipgramArgs),
    /// Extract context features and write classifier training files
    Extractfeatures(FeatureArgs),
    /// Rewrite the phrase table with classifier scores and run the decoder
    Contextmoses(ContextMosesArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Moses phrase table, optionally gzip or bzip2 compressed
    #[arg(short = 'i', long, value_name = "FILE")]
    input: PathBuf,
    /// Output prefix of the alignment model
    #[arg(short = 'o', long, value_name = "PREFIX")]
    output: PathBuf,
    /// Source class file, extended and written back
    #[arg(short = 'S', long, value_name = "FILE")]
    source_classes: PathBuf,
    /// Target class file, extended and written back
    #[arg(short = 'T', long, value_name = "FILE")]
    target_classes: PathBuf,
    /// Minimum p(t|s)
    #[arg(short = 'p', long, default_value_t = 0.0)]
    pts: f64,
    /// Minimum p(s|t)
    #[arg(short = 'P', long, default_value_t = 0.0)]
    pst: f64,
    /// Minimum p(t|s) * p(s|t)
    #[arg(short = 'j', long, default_value_t = 0.0)]
    joined: f64,
    /// Keep only options whose p(t|s) is at least this fraction of the best
    #[arg(short = 'd', long, default_value_t = 0.0)]
    divergence: f64,
    /// Source phrase list constraining the model
    #[arg(short = 'm', long, value_name = "FILE")]
    source_constraint: Option<PathBuf>,
    /// Target phrase list constraining the model
    #[arg(short = 'M', long, value_name = "FILE")]
    target_constraint: Option<PathBuf>,
    /// Minimum count of constraint phrases
    #[arg(short = 't', long, default_value_t = 1)]
    min_tokens: usize,
    /// Maximum source phrase length, 0 for unbounded
    #[arg(short = 'l', long, default_value_t = 0)]
    max_length: usize,
    /// Swap source and target
    #[arg(long)]
    reverse: bool,
    /// Field delimiter
    #[arg(long, default_value = "|||")]
    delimiter: String,
    /// One-based column holding the scores
    #[arg(long, default_value_t = 3)]
    score_column: usize,
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// Prefix of the alignment model
    #[arg(short = 'i', long, value_name = "PREFIX")]
    input: PathBuf,
    #[arg(short = 'S', long, value_name = "FILE")]
    source_classes: PathBuf,
    #[arg(short = 'T', long, value_name = "FILE")]
    target_classes: PathBuf,
    /// Normalization directive, one of s t 0 - per slot
    #[arg(long, value_name = "DIRECTIVE")]
    normalize: Option<String>,
    /// Save the (normalized) model under a new prefix
    #[arg(short = 'o', long, value_name = "PREFIX")]
    output: Option<PathBuf>,
    /// Export as a Moses phrase table instead of dumping
    #[arg(long, value_name = "FILE")]
    moses: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SkipgramArgs {
    #[arg(short = 'i', long, value_name = "PREFIX")]
    input: PathBuf,
    #[arg(short = 'o', long, value_name = "PREFIX")]
    output: PathBuf,
    #[arg(short = 't', long, default_value_t = 2)]
    min_tokens: usize,
    /// Minimum number of distinct gap fillers
    #[arg(short = 'y', long, default_value_t = 2)]
    min_skip_types: usize,
    #[arg(short = 'l', long, default_value_t = 8)]
    max_length: usize,
}

#[derive(Args, Debug)]
struct FeatureArgs {
    #[arg(short = 'i', long, value_name = "PREFIX")]
    input: PathBuf,
    #[arg(short = 'S', long, value_name = "FILE")]
    source_classes: PathBuf,
    #[arg(short = 'T', long, value_name = "FILE")]
    target_classes: PathBuf,
    /// Tokenised source corpus, one sentence per line
    #[arg(short = 's', long, value_name = "FILE")]
    source_corpus: PathBuf,
    /// Tokenised target corpus, parallel to the source corpus
    #[arg(short = 't', long, value_name = "FILE")]
    target_corpus: PathBuf,
    /// Factor corpus and its class file as CORPUS=CLASSES (repeatable); defaults to the source corpus
    #[arg(short = 'f', long = "factor", value_name = "CORPUS=CLASSES")]
    factors: Vec<String>,
    /// Left context size per factor (repeatable); factors without one take the first
    #[arg(short = 'l', long, default_values_t = [1])]
    left: Vec<usize>,
    /// Right context size per factor (repeatable); factors without one take the first
    #[arg(short = 'r', long, default_values_t = [1])]
    right: Vec<usize>,
    /// Leave the focus phrase out of the features
    #[arg(long)]
    no_focus: bool,
    /// Add global keyword features
    #[arg(short = 'k', long)]
    keywords: bool,
    #[arg(long, default_value_t = 3)]
    keyword_count: u32,
    #[arg(long, default_value_t = 1e-9)]
    keyword_probability: f64,
    #[arg(long, default_value_t = 100)]
    max_keywords: usize,
    #[arg(long)]
    weigh_by_occurrence: bool,
    #[arg(long)]
    weigh_by_score: bool,
    /// One classifier for all source patterns
    #[arg(long)]
    monolithic: bool,
    #[arg(long, default_value_t = 0)]
    instance_threshold: usize,
    /// Index of p(t|s) in the score vector
    #[arg(long, default_value_t = 2)]
    ranking_field: usize,
    /// Working directory for training files
    #[arg(short = 'w', long, value_name = "DIR")]
    workdir: PathBuf,
}

#[derive(Args, Debug)]
struct ContextMosesArgs {
    /// Tokenised test input, one sentence per line
    #[arg(short = 'f', long, value_name = "FILE")]
    input: Option<PathBuf>,
    #[arg(short = 'i', long, value_name = "PREFIX")]
    alignmodel: PathBuf,
    #[arg(short = 'S', long, value_name = "FILE")]
    source_classes: PathBuf,
    #[arg(short = 'T', long, value_name = "FILE")]
    target_classes: PathBuf,
    #[arg(short = 'w', long, value_name = "DIR")]
    workdir: PathBuf,
    /// Factored test corpora in context slot order; defaults to the input
    #[arg(short = 'F', long = "factor", value_name = "FILE")]
    factors: Vec<PathBuf>,
    #[arg(long, default_value = "append")]
    score_handling: ScoreHandling,
    /// Language model for the decoder
    #[arg(long, value_name = "FILE")]
    lm: Option<PathBuf>,
    #[arg(long, default_value_t = 3)]
    lm_order: usize,
    /// Decoder binary
    #[arg(long, default_value = "moses")]
    decoder: PathBuf,
    /// Decoder output
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Train classifiers first
    #[arg(long)]
    train: bool,
    /// Use the statistical baseline instead of the classifiers
    #[arg(short = 'I', long)]
    ignore_classifier: bool,
}

fn load_or_new_vocabulary(path: &Path) -> Result<Vocabulary> {
    if path.exists() {
        Vocabulary::load(path)
    } else {
        Ok(Vocabulary::new())
    }
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    let mut source_vocab = load_or_new_vocabulary(&args.source_classes)?;
    let mut target_vocab = load_or_new_vocabulary(&args.target_classes)?;

    let mut options = PhraseTableOptions::default();
    options.set_delimiter(args.delimiter)?;
    options.set_score_column(args.score_column)?;
    options.set_pts_threshold(args.pts)?;
    options.set_pst_threshold(args.pst)?;
    options.set_joined_threshold(args.joined)?;
    options.set_divergence_threshold(args.divergence)?;
    options.set_max_source_length(args.max_length);
    options.set_reverse(args.reverse);

    let source_constraint = match &args.source_constraint {
        Some(path) => {
            log::info!("Loading source constraint model {}", path.display());
            Some(PatternSet::load(path, &mut source_vocab, args.min_tokens, args.max_length)?)
        }
        None => None,
    };
    let target_constraint = match &args.target_constraint {
        Some(path) => {
            log::info!("Loading target constraint model {}", path.display());
            Some(PatternSet::load(path, &mut target_vocab, args.min_tokens, 0)?)
        }
        None => None,
    };

    let mut model = AlignmentModel::new();
    let reader = open_phrase_table(&args.input)?;
    let stats = model.load_moses_phrase_table(
        reader,
        &mut source_vocab,
        &mut target_vocab,
        &options,
        source_constraint.as_ref().map(|c| c as &dyn PatternModelInterface),
        target_constraint.as_ref().map(|c| c as &dyn PatternModelInterface),
        None,
    )?;
    log::info!(
        "{} pairs for {} source patterns ({} malformed lines)",
        model.num_pairs(),
        model.len(),
        stats.malformed
    );
    model.save(&args.output)?;
    source_vocab.save(&args.source_classes)?;
    target_vocab.save(&args.target_classes)?;
    Ok(())
}

fn run_view(args: ViewArgs) -> Result<()> {
    let source_vocab = Rc::new(Vocabulary::load(&args.source_classes)?);
    let target_vocab = Rc::new(Vocabulary::load(&args.target_classes)?);
    let mut model = AlignmentModel::load(&args.input)?;
    if let Some(directive) = &args.normalize {
        model.normalize(directive)?;
    }
    if let Some(output) = &args.output {
        model.save(output)?;
    }

    if let Some(path) = &args.moses {
        let mut writer = BufWriter::new(File::create(path)?);
        model.save_moses_phrase_table(&mut writer, &source_vocab, &target_vocab)?;
        writer.flush()?;
    } else if args.output.is_none() {
        let mut decoders = DecoderCache::new();
        decoders.load_decoders(model.conf(), &[Rc::clone(&source_vocab), Rc::clone(&target_vocab)])?;
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        model.write_dump(&mut writer, &source_vocab, &target_vocab, &decoders)?;
        writer.flush()?;
    }
    Ok(())
}

fn run_skipgrams(args: SkipgramArgs) -> Result<()> {
    let mut model = AlignmentModel::load(&args.input)?;
    let mut options = SkipgramOptions::default();
    options.set_min_tokens(args.min_tokens)?;
    options.set_min_skip_types(args.min_skip_types)?;
    options.set_max_length(args.max_length)?;
    let inserted = abstract_skipgrams(&mut model, &options)?;
    log::info!("{} skipgram pairs added", inserted);
    model.save(&args.output)
}

/// Index a corpus for exactly the patterns of a constraint model
fn index_corpus(corpus: &IndexedCorpus, constraint: &PatternSet) -> Result<IndexedPatternModel> {
    let mut options = PatternModelOptions::default();
    options.set_min_tokens(1)?;
    options.set_max_length(constraint.iter().map(Pattern::len).max().unwrap_or(1).max(1))?;
    if constraint.iter().any(Pattern::is_skipgram) {
        options.set_do_skipgrams(true);
        options.set_min_skip_types(1)?;
    }
    Ok(IndexedPatternModel::train(corpus, &options, Some(constraint)))
}

/// Left and right window per factor, falling back to the first value given
fn context_windows(
    factors: usize,
    left: &[usize],
    right: &[usize],
) -> Result<Vec<(usize, usize)>> {
    if left.len() > factors || right.len() > factors {
        return Err(colibrimt::Error::InvalidInput(format!(
            "{} left and {} right window sizes for {} factors",
            left.len(),
            right.len(),
            factors
        )));
    }
    let first_left = left.first().copied().unwrap_or(1);
    let first_right = right.first().copied().unwrap_or(1);
    Ok((0..factors)
        .map(|i| {
            (
                left.get(i).copied().unwrap_or(first_left),
                right.get(i).copied().unwrap_or(first_right),
            )
        })
        .collect())
}

fn factor_configuration(
    classes: &[PathBuf],
    windows: &[(usize, usize)],
    focus: bool,
) -> FeatureConfiguration {
    let mut conf = FeatureConfiguration::new();
    for (decoder, &(left, right)) in classes.iter().zip(windows) {
        conf.add_context_feature(decoder, left, focus, right);
    }
    conf
}

fn run_extract(args: FeatureArgs) -> Result<()> {
    let source_vocab = Rc::new(Vocabulary::load(&args.source_classes)?);
    let target_vocab = Vocabulary::load(&args.target_classes)?;
    let model = AlignmentModel::load(&args.input)?;

    let source_corpus = IndexedCorpus::load(&args.source_corpus, &source_vocab)?;
    let target_corpus = IndexedCorpus::load(&args.target_corpus, &target_vocab)?;
    log::info!("Indexing source and target corpus");
    let source_model = index_corpus(&source_corpus, &model.source_model())?;
    let target_model = index_corpus(&target_corpus, &model.target_model())?;

    let mut factor_vocabs = vec![Rc::clone(&source_vocab)];
    let mut factor_corpora = Vec::new();
    let mut factor_classes = Vec::new();
    if args.factors.is_empty() {
        factor_classes.push(args.source_classes.clone());
    } else {
        for factor in &args.factors {
            let (corpus, classes) = factor.split_once('=').ok_or_else(|| {
                colibrimt::Error::InvalidInput(format!("factor {:?} is not CORPUS=CLASSES", factor))
            })?;
            let known = factor_vocabs
                .iter()
                .find(|v| v.filename() == Some(Path::new(classes)))
                .cloned();
            let vocab = match known {
                Some(vocab) => vocab,
                None => {
                    let vocab = Rc::new(Vocabulary::load(classes)?);
                    factor_vocabs.push(Rc::clone(&vocab));
                    vocab
                }
            };
            factor_corpora.push(IndexedCorpus::load(corpus, &vocab)?);
            factor_classes.push(PathBuf::from(classes));
        }
    }
    let windows = context_windows(factor_classes.len(), &args.left, &args.right)?;
    let conf = factor_configuration(&factor_classes, &windows, !args.no_focus);
    let corpora: Vec<&IndexedCorpus> = if factor_corpora.is_empty() {
        vec![&source_corpus]
    } else {
        factor_corpora.iter().collect()
    };

    let mut decoders = DecoderCache::new();
    decoders.load_decoders(&conf, &factor_vocabs)?;

    let keyword_options = if args.keywords {
        let mut options = KeywordOptions::default();
        options.set_absolute_threshold(args.keyword_count);
        options.set_probability_threshold(args.keyword_probability)?;
        options.set_max_keywords(args.max_keywords)?;
        Some(options)
    } else {
        None
    };
    let config = ClassifierConfig {
        weighting: match (args.weigh_by_occurrence, args.weigh_by_score) {
            (_, true) => Weighting::OccurrenceScore,
            (true, false) => Weighting::Occurrence,
            (false, false) => Weighting::Duplicate,
        },
        monolithic: args.monolithic,
        instance_threshold: args.instance_threshold,
        ranking_field: args.ranking_field,
        keywords: keyword_options.clone(),
        conf: conf.clone(),
    };

    fs::create_dir_all(&args.workdir)?;
    let mut extractor = ContextExtractor::new(&model, &source_model, &target_model, &conf, corpora)?;
    extractor.set_ranking_field(args.ranking_field);
    if let Some(options) = keyword_options {
        let store = KeywordStore {
            workdir: &args.workdir,
            source_vocab: &source_vocab,
            target_vocab: &target_vocab,
        };
        extractor.mine_keywords(&source_corpus, options, Some(store));
    }

    let mut builder =
        TrainingSetBuilder::new(&args.workdir, config, &source_vocab, &target_vocab, &decoders)?;
    builder.build(extractor.extract())?;
    let summary = builder.finish()?;
    log::info!(
        "{} classifiers, {} unambiguous patterns, {} below threshold",
        summary.written,
        summary.skipped_unambiguous,
        summary.skipped_threshold
    );
    Ok(())
}

fn run_contextmoses(args: ContextMosesArgs) -> Result<()> {
    let config = ClassifierConfig::load(&args.workdir)?;
    let backend = MemoryBackend::new(config.weighting.is_weighted());
    if args.train {
        let trained = train_classifiers(&args.workdir, &backend)?;
        log::info!("Trained {} classifiers", trained);
    }
    let Some(input) = &args.input else {
        if !args.train {
            return Err(colibrimt::Error::InvalidInput(
                "specify an input file (-f) or --train".to_string(),
            ));
        }
        return Ok(());
    };

    let source_vocab = Rc::new(Vocabulary::load(&args.source_classes)?);
    let target_vocab = Vocabulary::load(&args.target_classes)?;
    log::info!("Loading alignment model (may take a while)");
    let model = AlignmentModel::load(&args.alignmodel)?;
    let test_corpus = IndexedCorpus::load(input, &source_vocab)?;

    let mut decoders = DecoderCache::new();
    decoders.load_decoders(&config.conf, &[Rc::clone(&source_vocab)])?;
    let mut factor_corpora = Vec::new();
    for (i, slot) in config.conf.context_slots().enumerate() {
        let colibrimt::Slot::Context { decoder, .. } = slot else {
            continue;
        };
        let vocab = decoders.get(decoder).ok_or_else(|| {
            colibrimt::Error::SchemaMismatch(format!("decoder {} not loaded", decoder.display()))
        })?;
        let path = args.factors.get(i).unwrap_or(input);
        factor_corpora.push(IndexedCorpus::load(path, vocab)?);
    }

    let mut options = DecodeOptions::default();
    options.set_score_handling(args.score_handling);
    options.set_ignore_classifier(args.ignore_classifier);
    let contextmoses = ContextMoses::new(
        &model,
        &config,
        &args.workdir,
        &backend,
        options,
        &source_vocab,
        &target_vocab,
    );
    let test_model = contextmoses.build_test_model(&test_corpus)?;
    let score_columns = contextmoses.rewrite(
        &test_model,
        &test_corpus,
        factor_corpora.iter().collect(),
        &decoders,
    )?;

    let Some(lm) = &args.lm else {
        log::info!("No language model given, not writing moses.ini");
        return Ok(());
    };
    let ini = args.workdir.join("moses.ini");
    MosesConfig::new(contextmoses.phrase_table_path(), score_columns, lm, args.lm_order)?
        .write(&ini)?;
    if let Some(output) = &args.output {
        run_decoder(&args.decoder, &ini, input, output)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Phrasetable2alignmodel(args) => run_convert(args),
        Commands::Alignmodel(args) => run_view(args),
        Commands::Extractskipgrams(args) => run_skipgrams(args),
        Commands::Extractfeatures(args) => run_extract(args),
        Commands::Contextmoses(args) => run_contextmoses(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
