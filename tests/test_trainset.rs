use std::fs;
use std::path::Path;
use std::rc::Rc;

use colibrimt::train::{expert_training_file, MONOLITHIC_INDEX_FILE, MONOLITHIC_TRAIN_FILE};
use colibrimt::{
    ClassifierConfig, ContextInstance, DecoderCache, FeatureConfiguration, FeatureValue,
    Occurrence, TrainingSetBuilder, TrainingSummary, Vocabulary, Weighting,
};

struct Fixture {
    source_vocab: Rc<Vocabulary>,
    target_vocab: Vocabulary,
    decoders: DecoderCache,
    conf: FeatureConfiguration,
    instances: Vec<ContextInstance>,
}

fn instance(
    source_vocab: &Vocabulary,
    target_vocab: &Vocabulary,
    source: &str,
    target: &str,
    context: [&str; 3],
    sentence: u32,
    score: f64,
) -> ContextInstance {
    ContextInstance {
        occurrence: Occurrence {
            source: source_vocab.build_pattern(source),
            target: target_vocab.build_pattern(target),
            sentence,
            token: 1,
            target_token: 1,
            score,
        },
        context: context
            .iter()
            .map(|w| FeatureValue::Pattern(source_vocab.build_pattern(w)))
            .collect(),
        keywords: Vec::new(),
    }
}

/// "bank" translates to "shore" twice in the same context and to "bench"
/// once; "huis" has a single translation
fn fixture() -> Fixture {
    let mut source_vocab = Vocabulary::new();
    source_vocab
        .build_from_text("de bank rivier zit huis".as_bytes())
        .unwrap();
    source_vocab.set_filename("source.cls");
    let mut target_vocab = Vocabulary::new();
    target_vocab
        .build_from_text("shore bench house".as_bytes())
        .unwrap();

    let instances = vec![
        instance(&source_vocab, &target_vocab, "bank", "shore", ["de", "bank", "rivier"], 0, 0.6),
        instance(&source_vocab, &target_vocab, "bank", "shore", ["de", "bank", "rivier"], 3, 0.6),
        instance(&source_vocab, &target_vocab, "bank", "bench", ["de", "bank", "zit"], 5, 0.4),
        instance(&source_vocab, &target_vocab, "huis", "house", ["de", "huis", "zit"], 2, 1.0),
    ];

    let source_vocab = Rc::new(source_vocab);
    let mut decoders = DecoderCache::new();
    decoders.insert(Rc::clone(&source_vocab)).unwrap();
    let mut conf = FeatureConfiguration::new();
    conf.add_context_feature("source.cls", 1, true, 1);
    Fixture {
        source_vocab,
        target_vocab,
        decoders,
        conf,
        instances,
    }
}

fn build(fx: &Fixture, workdir: &Path, config: ClassifierConfig) -> TrainingSummary {
    let mut builder = TrainingSetBuilder::new(
        workdir,
        config,
        &fx.source_vocab,
        &fx.target_vocab,
        &fx.decoders,
    )
    .unwrap();
    builder.build(fx.instances.iter().cloned().map(Ok)).unwrap();
    builder.finish().unwrap()
}

#[test]
fn test_expert_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let summary = build(&fx, dir.path(), ClassifierConfig::new(fx.conf.clone()));
    assert_eq!(summary.written, 1);
    assert_eq!(summary.skipped_unambiguous, 1);
    assert_eq!(summary.skipped_threshold, 0);

    let bank = fx.source_vocab.build_pattern("bank");
    let path = expert_training_file(dir.path(), &fx.source_vocab, &bank);
    assert!(path.ends_with("bank.train"));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "de\tbank\trivier\tshore\nde\tbank\trivier\tshore\nde\tbank\tzit\tbench\n"
    );

    // a single translation option needs no classifier
    let huis = fx.source_vocab.build_pattern("huis");
    assert!(!expert_training_file(dir.path(), &fx.source_vocab, &huis).exists());
    assert!(!dir.path().join(MONOLITHIC_TRAIN_FILE).exists());

    let config = ClassifierConfig::load(dir.path()).unwrap();
    assert_eq!(config.conf, fx.conf);
    assert_eq!(config.weighting, Weighting::Duplicate);
}

#[test]
fn test_weighted_files() {
    let fx = fixture();
    let bank = fx.source_vocab.build_pattern("bank");

    let dir = tempfile::tempdir().unwrap();
    let mut config = ClassifierConfig::new(fx.conf.clone());
    config.weighting = Weighting::Occurrence;
    build(&fx, dir.path(), config);
    assert_eq!(
        fs::read_to_string(expert_training_file(dir.path(), &fx.source_vocab, &bank)).unwrap(),
        "de\tbank\trivier\tshore\t2\nde\tbank\tzit\tbench\t1\n"
    );

    let dir = tempfile::tempdir().unwrap();
    let mut config = ClassifierConfig::new(fx.conf.clone());
    config.weighting = Weighting::OccurrenceScore;
    build(&fx, dir.path(), config);
    assert_eq!(
        fs::read_to_string(expert_training_file(dir.path(), &fx.source_vocab, &bank)).unwrap(),
        "de\tbank\trivier\tshore\t1.2\nde\tbank\tzit\tbench\t0.4\n"
    );
}

#[test]
fn test_monolithic_layout() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let mut config = ClassifierConfig::new(fx.conf.clone());
    config.monolithic = true;
    let summary = build(&fx, dir.path(), config);
    assert_eq!(summary.written, 1);

    assert_eq!(
        fs::read_to_string(dir.path().join(MONOLITHIC_TRAIN_FILE)).unwrap(),
        "bank\tde\tbank\trivier\tshore\nbank\tde\tbank\trivier\tshore\nbank\tde\tbank\tzit\tbench\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join(MONOLITHIC_INDEX_FILE)).unwrap(),
        "bank\n"
    );
    let bank = fx.source_vocab.build_pattern("bank");
    assert!(!expert_training_file(dir.path(), &fx.source_vocab, &bank).exists());
}

#[test]
fn test_instance_threshold() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let mut config = ClassifierConfig::new(fx.conf.clone());
    config.instance_threshold = 4;
    let summary = build(&fx, dir.path(), config);
    assert_eq!(summary.written, 0);
    assert_eq!(summary.skipped_threshold, 1);
    assert_eq!(summary.skipped_unambiguous, 1);
}

#[test]
fn test_keyword_flags_rendered() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let mut instances = fx.instances.clone();
    instances[0].keywords = vec![true, false];
    instances[1].keywords = vec![true, false];
    instances[2].keywords = vec![false, true];

    let mut builder = TrainingSetBuilder::new(
        dir.path(),
        ClassifierConfig::new(fx.conf.clone()),
        &fx.source_vocab,
        &fx.target_vocab,
        &fx.decoders,
    )
    .unwrap();
    assert_eq!(
        builder.render_features(&instances[2]).unwrap(),
        vec!["de", "bank", "zit", "0", "1"]
    );
    builder.build(instances.into_iter().map(Ok)).unwrap();
    builder.finish().unwrap();

    let bank = fx.source_vocab.build_pattern("bank");
    let content =
        fs::read_to_string(expert_training_file(dir.path(), &fx.source_vocab, &bank)).unwrap();
    assert!(content.starts_with("de\tbank\trivier\t1\t0\tshore\n"));
}
