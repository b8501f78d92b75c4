//! Decode-time rewriting of the phrase table with classifier scores

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::alignmodel::AlignmentModel;
use crate::corpus::IndexedCorpus;
use crate::error::{Error, Result};
use crate::extract::{keyword_flags, ContextWindows};
use crate::feature::{DecoderCache, FeatureValue, FeatureVector, SlotFilter};
use crate::keywords::KeywordStore;
use crate::pattern::Pattern;
use crate::patternmodel::{IndexedPatternModel, PatternModelOptions};
use crate::train::{
    expert_training_file, Classifier, ClassifierBackend, ClassifierConfig, MONOLITHIC_TRAIN_FILE,
};
use crate::vocabulary::Vocabulary;

/// File name of the rewritten phrase table inside the working directory
pub const PHRASE_TABLE_FILE: &str = "contextmoses.phrasetable";

/// How classifier output is combined with the static scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreHandling {
    /// Add the classifier score as an extra score column
    #[default]
    Append,
    /// Overwrite p(t|s) with the classifier score
    Replace,
    /// Weigh the classifier score against p(t|s)
    Weighed,
}

impl FromStr for ScoreHandling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(ScoreHandling::Append),
            "replace" => Ok(ScoreHandling::Replace),
            "weighed" => Ok(ScoreHandling::Weighed),
            other => Err(Error::invalid_input(format!(
                "unknown score handling {:?}, expected append, replace or weighed",
                other
            ))),
        }
    }
}

/// Options for [`ContextMoses`]
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    score_handling: ScoreHandling,
    ignore_classifier: bool,
    epsilon: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            score_handling: ScoreHandling::Append,
            ignore_classifier: false,
            epsilon: 1e-6,
        }
    }
}

impl DecodeOptions {
    pub fn score_handling(&self) -> ScoreHandling {
        self.score_handling
    }

    pub fn set_score_handling(&mut self, handling: ScoreHandling) {
        self.score_handling = handling;
    }

    pub fn ignore_classifier(&self) -> bool {
        self.ignore_classifier
    }

    /// Always use the statistical baseline p(t|s)
    pub fn set_ignore_classifier(&mut self, ignore: bool) {
        self.ignore_classifier = ignore;
    }

    /// Score of a translation option the classifier never predicted
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(Error::invalid_input("epsilon must be between 0 and 1 exclusive"));
        }
        self.epsilon = epsilon;
        Ok(())
    }
}

/// Holds the classifier of one training file at a time
///
/// The classifier is reloaded only when a different training file is
/// requested, so monolithic runs load once and expert runs once per source
/// pattern.
pub struct ClassifierCache<'b, B: ClassifierBackend> {
    backend: &'b B,
    current: Option<(PathBuf, Option<B::Classifier>)>,
    loads: usize,
}

impl<'b, B: ClassifierBackend> ClassifierCache<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            current: None,
            loads: 0,
        }
    }

    pub fn get(&mut self, training_file: &Path) -> Result<Option<&B::Classifier>> {
        let fresh = matches!(&self.current, Some((path, _)) if path == training_file);
        if !fresh {
            let classifier = self.backend.load(training_file)?;
            self.loads += 1;
            self.current = Some((training_file.to_path_buf(), classifier));
        }
        Ok(self.current.as_ref().and_then(|(_, c)| c.as_ref()))
    }

    /// Number of times a classifier was loaded from the backend
    pub fn loads(&self) -> usize {
        self.loads
    }
}

/// Rewrites an alignment model into a test-specific phrase table
pub struct ContextMoses<'a, B: ClassifierBackend> {
    model: &'a AlignmentModel,
    config: &'a ClassifierConfig,
    workdir: PathBuf,
    backend: &'a B,
    options: DecodeOptions,
    source_vocab: &'a Vocabulary,
    target_vocab: &'a Vocabulary,
}

impl<'a, B: ClassifierBackend> ContextMoses<'a, B> {
    pub fn new<P: Into<PathBuf>>(
        model: &'a AlignmentModel,
        config: &'a ClassifierConfig,
        workdir: P,
        backend: &'a B,
        options: DecodeOptions,
        source_vocab: &'a Vocabulary,
        target_vocab: &'a Vocabulary,
    ) -> Self {
        Self {
            model,
            config,
            workdir: workdir.into(),
            backend,
            options,
            source_vocab,
            target_vocab,
        }
    }

    pub fn phrase_table_path(&self) -> PathBuf {
        self.workdir.join(PHRASE_TABLE_FILE)
    }

    /// Index the test corpus for the source patterns the model knows
    pub fn build_test_model(&self, corpus: &IndexedCorpus) -> Result<IndexedPatternModel> {
        let constraint = self.model.source_model();
        let mut options = PatternModelOptions::default();
        options.set_min_tokens(1)?;
        let longest = self.model.source_patterns().map(Pattern::len).max().unwrap_or(1);
        options.set_max_length(longest.max(1))?;
        if self.model.source_patterns().any(Pattern::is_skipgram) {
            options.set_do_skipgrams(true);
            options.set_min_skip_types(1)?;
        }
        Ok(IndexedPatternModel::train(corpus, &options, Some(&constraint)))
    }

    /// Write the intermediate phrase table and return its number of score columns
    ///
    /// `test_corpus` is the plain test corpus used for keyword features,
    /// `corpora` the factored test corpora, one per context slot.
    pub fn rewrite(
        &self,
        test_model: &IndexedPatternModel,
        test_corpus: &IndexedCorpus,
        corpora: Vec<&IndexedCorpus>,
        decoders: &DecoderCache,
    ) -> Result<usize> {
        if self.options.score_handling == ScoreHandling::Weighed {
            return Err(Error::NotImplemented("weighed score handling"));
        }
        let windows = ContextWindows::new(&self.config.conf, corpora)?;
        let store = KeywordStore {
            workdir: &self.workdir,
            source_vocab: self.source_vocab,
            target_vocab: self.target_vocab,
        };
        let mut cache = ClassifierCache::new(self.backend);
        let mut table = AlignmentModel::new();
        let mut score_columns = None;

        for source in test_model.patterns() {
            if !self.model.has_source(source) {
                continue;
            }
            let occurrences = test_model.occurrences(source).unwrap_or(&[]);
            let (sums, classified) = if self.options.ignore_classifier {
                (BTreeMap::new(), 0)
            } else {
                let training_file = if self.config.monolithic {
                    self.workdir.join(MONOLITHIC_TRAIN_FILE)
                } else {
                    expert_training_file(&self.workdir, self.source_vocab, source)
                };
                match cache.get(&training_file)? {
                    Some(classifier) => {
                        let keywords = if self.config.keywords.is_some() {
                            store.read(source)?
                        } else {
                            Vec::new()
                        };
                        let mut sums: BTreeMap<Pattern, f64> = BTreeMap::new();
                        let mut classified = 0;
                        for occurrence in occurrences {
                            let context =
                                windows.extract(occurrence.sentence, occurrence.token, source.len())?;
                            let mut features = Vec::new();
                            if self.config.monolithic {
                                features.push(self.source_vocab.render(source));
                            }
                            if !self.config.conf.is_empty() {
                                features.extend(self.config.conf.render(
                                    &context,
                                    SlotFilter::CONTEXT,
                                    decoders,
                                )?);
                            }
                            features.extend(
                                keyword_flags(test_corpus, occurrence.sentence, &keywords)
                                    .into_iter()
                                    .map(|k| u8::from(k).to_string()),
                            );
                            let distribution = classifier.classify(&features)?;
                            if distribution.is_empty() {
                                continue;
                            }
                            classified += 1;
                            for (label, probability) in distribution {
                                let target = self.target_vocab.build_pattern(&label);
                                if !self.model.has_pair(source, &target) {
                                    log::warn!(
                                        "Classifier predicted {:?} which is not a translation of {}",
                                        label,
                                        self.source_vocab.render(source)
                                    );
                                    continue;
                                }
                                *sums.entry(target).or_insert(0.0) += probability;
                            }
                        }
                        (sums, classified)
                    }
                    None => (BTreeMap::new(), 0),
                }
            };

            for target in self.model.target_patterns(Some(source)) {
                let Some(vector) = self.model.get(source, target) else {
                    continue;
                };
                let (mut scores, alignment) = self.split_vector(vector)?;
                let baseline = *scores.get(self.config.ranking_field).ok_or_else(|| {
                    Error::schema(format!(
                        "no score at ranking field {}",
                        self.config.ranking_field
                    ))
                })?;
                let score = if classified > 0 {
                    match sums.get(target) {
                        Some(sum) if *sum > 0.0 => sum / classified as f64,
                        _ => self.options.epsilon,
                    }
                } else {
                    baseline
                };
                match self.options.score_handling {
                    ScoreHandling::Append => scores.push(score),
                    ScoreHandling::Replace => scores[self.config.ranking_field] = score,
                    ScoreHandling::Weighed => {
                        return Err(Error::NotImplemented("weighed score handling"))
                    }
                }
                match score_columns {
                    None => score_columns = Some(scores.len()),
                    Some(n) if n != scores.len() => {
                        return Err(Error::schema(format!(
                            "rewritten entries have {} and {} score columns",
                            n,
                            scores.len()
                        )))
                    }
                    Some(_) => {}
                }
                let mut rewritten: FeatureVector =
                    scores.into_iter().map(FeatureValue::Score).collect();
                if let Some(alignment) = alignment {
                    rewritten.push(FeatureValue::Alignment(alignment));
                }
                table.add(source.clone(), target.clone(), rewritten)?;
            }
        }

        fs::create_dir_all(&self.workdir)?;
        let mut writer = BufWriter::new(File::create(self.phrase_table_path())?);
        table.save_moses_phrase_table(&mut writer, self.source_vocab, self.target_vocab)?;
        writer.flush()?;
        log::info!(
            "Wrote {} entries for {} source patterns to {} ({} classifier loads)",
            table.num_pairs(),
            table.len(),
            self.phrase_table_path().display(),
            cache.loads()
        );
        score_columns.ok_or_else(|| {
            Error::invalid_input("no source pattern of the model occurs in the test corpus")
        })
    }

    /// Score values and word alignment of a model vector
    fn split_vector(&self, vector: &[FeatureValue]) -> Result<(Vec<f64>, Option<Vec<(u32, u32)>>)> {
        let alignment = vector
            .iter()
            .find_map(FeatureValue::as_alignment)
            .map(<[(u32, u32)]>::to_vec);
        let conf = self.model.conf();
        let scores = if conf.is_empty() {
            vector.iter().filter_map(FeatureValue::as_f64).collect()
        } else {
            let mut scores = Vec::with_capacity(conf.score_count());
            for item in conf.items(SlotFilter::SCORE, Some(vector))? {
                for value in item.values.unwrap_or(&[]) {
                    scores.push(value.as_f64().ok_or_else(|| {
                        Error::schema(format!("score slot {} is not numeric", item.index))
                    })?);
                }
            }
            scores
        };
        Ok((scores, alignment))
    }
}

/// Train a classifier for every `*.train` file in the working directory
pub fn train_classifiers<B: ClassifierBackend>(workdir: &Path, backend: &B) -> Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(workdir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == "train") {
            files.push(path);
        }
    }
    files.sort();
    for file in &files {
        log::info!("Training {}", file.display());
        backend.train(file)?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_handling_from_str() {
        assert_eq!("append".parse::<ScoreHandling>().unwrap(), ScoreHandling::Append);
        assert_eq!("replace".parse::<ScoreHandling>().unwrap(), ScoreHandling::Replace);
        assert_eq!("weighed".parse::<ScoreHandling>().unwrap(), ScoreHandling::Weighed);
        assert!("blend".parse::<ScoreHandling>().is_err());
    }

    #[test]
    fn test_epsilon_validation() {
        let mut options = DecodeOptions::default();
        assert!(options.set_epsilon(0.0).is_err());
        assert!(options.set_epsilon(1.0).is_err());
        assert!(options.set_epsilon(1e-3).is_ok());
    }
}
