//! Cross-referencing the alignment model with corpora to extract context features

use std::collections::{BTreeMap, HashMap};

use crate::alignmodel::AlignmentModel;
use crate::corpus::{IndexedCorpus, TokenRef};
use crate::error::{Error, Result};
use crate::feature::{FeatureConfiguration, FeatureValue, FeatureVector, Slot};
use crate::keywords::{mine_keywords, Keyword, KeywordOptions, KeywordStore};
use crate::pattern::{ClassId, Pattern};
use crate::patternmodel::{IndexedPatternModel, PatternModelInterface};

/// An aligned pair found in the same sentence of the source and target corpus
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub source: Pattern,
    pub target: Pattern,
    pub sentence: u32,
    /// Offset of the source pattern in the source sentence
    pub token: u32,
    /// Offset of the target pattern in the target sentence
    pub target_token: u32,
    /// Ranking score of the pair, p(t|s)
    pub score: f64,
}

/// Find the corpus occurrences of every aligned pair
///
/// Yields, for each source pattern of the model, the deduplicated
/// occurrences of its aligned pairs sorted by position. The source and target
/// must occur in the same sentence; the first target occurrence in that
/// sentence is taken.
pub fn patterns_with_indexes<'a>(
    model: &'a AlignmentModel,
    source_model: &'a IndexedPatternModel,
    target_model: &'a IndexedPatternModel,
    ranking_field: usize,
) -> impl Iterator<Item = (&'a Pattern, Vec<Occurrence>)> + 'a {
    model.source_patterns().filter_map(move |source| {
        if !source_model.has(source) {
            log::warn!("Source pattern {:?} not found in source model", source);
            return None;
        }
        let mut source_occurrences: Option<&[TokenRef]> = None;
        let mut found: BTreeMap<(u32, u32, u32), Occurrence> = BTreeMap::new();
        for target in model.target_patterns(Some(source)) {
            let Some(target_occurrences) = target_model.occurrences(target) else {
                log::warn!("Target pattern {:?} not found in target model", target);
                continue;
            };
            let source_occurrences = *source_occurrences
                .get_or_insert_with(|| source_model.occurrences(source).unwrap_or(&[]));
            let score = model
                .get(source, target)
                .and_then(|v| v.get(ranking_field))
                .and_then(FeatureValue::as_f64)
                .unwrap_or(0.0);
            for occurrence in source_occurrences {
                let Some(target_occurrence) = target_occurrences
                    .iter()
                    .find(|t| t.sentence == occurrence.sentence)
                else {
                    continue;
                };
                let key = (occurrence.sentence, occurrence.token, target_occurrence.token);
                match found.get(&key) {
                    Some(existing) if existing.score >= score => {}
                    _ => {
                        found.insert(
                            key,
                            Occurrence {
                                source: source.clone(),
                                target: target.clone(),
                                sentence: occurrence.sentence,
                                token: occurrence.token,
                                target_token: target_occurrence.token,
                                score,
                            },
                        );
                    }
                }
            }
        }
        if found.is_empty() {
            return None;
        }
        Some((source, found.into_values().collect()))
    })
}

/// Take a window of tokens around a span of `n` tokens
///
/// Positions before the sentence become begin markers, positions past its
/// end become end markers. The focus, when included, is the span itself.
pub fn extract_window(
    corpus: &IndexedCorpus,
    sentence: u32,
    token: u32,
    n: usize,
    left: usize,
    focus: bool,
    right: usize,
) -> Result<Vec<Pattern>> {
    let length = corpus
        .sentence_length(sentence)
        .ok_or_else(|| Error::InvalidWindow(format!("no sentence {}", sentence)))?;
    let start = token as usize;
    let end = start + n;
    if n == 0 || end > length {
        return Err(Error::InvalidWindow(format!(
            "span {}..{} exceeds sentence {} of length {}",
            start, end, sentence, length
        )));
    }
    let lookup = |position: usize| {
        corpus.unigram(sentence, position as u32).ok_or_else(|| {
            Error::InvalidWindow(format!("no token {} in sentence {}", position, sentence))
        })
    };

    let mut window = Vec::with_capacity(left + usize::from(focus) + right);
    for distance in (1..=left).rev() {
        if distance > start {
            window.push(Pattern::begin_marker());
        } else {
            window.push(lookup(start - distance)?);
        }
    }
    if focus {
        let span = corpus
            .span(sentence, start as u32, end as u32)
            .ok_or_else(|| Error::InvalidWindow(format!("no focus span in sentence {}", sentence)))?;
        window.push(span);
    }
    for position in end..end + right {
        if position >= length {
            window.push(Pattern::end_marker());
        } else {
            window.push(lookup(position)?);
        }
    }
    Ok(window)
}

/// Context windows over factored corpora, one per context slot
#[derive(Debug, Clone)]
pub struct ContextWindows<'a> {
    conf: &'a FeatureConfiguration,
    corpora: Vec<&'a IndexedCorpus>,
}

impl<'a> ContextWindows<'a> {
    pub fn new(conf: &'a FeatureConfiguration, corpora: Vec<&'a IndexedCorpus>) -> Result<Self> {
        let slots = conf.context_slots().count();
        if slots != corpora.len() {
            return Err(Error::invalid_input(format!(
                "{} context slots configured but {} factor corpora given",
                slots,
                corpora.len()
            )));
        }
        Ok(Self { conf, corpora })
    }

    pub fn conf(&self) -> &FeatureConfiguration {
        self.conf
    }

    /// Windows of every context slot around a span, concatenated
    pub fn extract(&self, sentence: u32, token: u32, n: usize) -> Result<FeatureVector> {
        let mut features = Vec::with_capacity(self.conf.width());
        for (slot, corpus) in self.conf.context_slots().zip(&self.corpora) {
            if let Slot::Context {
                left, focus, right, ..
            } = *slot
            {
                let window = extract_window(corpus, sentence, token, n, left, focus, right)?;
                features.extend(window.into_iter().map(FeatureValue::Pattern));
            }
        }
        Ok(features)
    }
}

/// Whether each keyword occurs in a sentence
pub fn keyword_flags(corpus: &IndexedCorpus, sentence: u32, keywords: &[Keyword]) -> Vec<bool> {
    let tokens = corpus.sentence(sentence).unwrap_or(&[]);
    keywords
        .iter()
        .map(|k| tokens.contains(&k.word))
        .collect()
}

/// Context features of one occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct ContextInstance {
    pub occurrence: Occurrence,
    /// Window values of all context slots, concatenated in slot order
    pub context: FeatureVector,
    /// One flag per keyword of the source pattern
    pub keywords: Vec<bool>,
}

enum KeywordMode<'a> {
    Off,
    Mine {
        corpus: &'a IndexedCorpus,
        global_counts: HashMap<ClassId, u32>,
        options: KeywordOptions,
        store: Option<KeywordStore<'a>>,
    },
    Load {
        corpus: &'a IndexedCorpus,
        store: KeywordStore<'a>,
    },
}

/// Produces classifier training instances from an alignment model
pub struct ContextExtractor<'a> {
    model: &'a AlignmentModel,
    source_model: &'a IndexedPatternModel,
    target_model: &'a IndexedPatternModel,
    windows: ContextWindows<'a>,
    ranking_field: usize,
    keywords: KeywordMode<'a>,
}

impl<'a> ContextExtractor<'a> {
    /// Fails when the number of corpora differs from the number of context slots
    pub fn new(
        model: &'a AlignmentModel,
        source_model: &'a IndexedPatternModel,
        target_model: &'a IndexedPatternModel,
        conf: &'a FeatureConfiguration,
        corpora: Vec<&'a IndexedCorpus>,
    ) -> Result<Self> {
        Ok(Self {
            model,
            source_model,
            target_model,
            windows: ContextWindows::new(conf, corpora)?,
            ranking_field: 2,
            keywords: KeywordMode::Off,
        })
    }

    pub fn set_ranking_field(&mut self, field: usize) {
        self.ranking_field = field;
    }

    /// Mine keywords per source pattern from `corpus`, optionally writing them to `store`
    pub fn mine_keywords(
        &mut self,
        corpus: &'a IndexedCorpus,
        options: KeywordOptions,
        store: Option<KeywordStore<'a>>,
    ) {
        self.keywords = KeywordMode::Mine {
            corpus,
            global_counts: corpus.unigram_counts(),
            options,
            store,
        };
    }

    /// Use keywords mined earlier and stored in `store`
    pub fn load_keywords(&mut self, corpus: &'a IndexedCorpus, store: KeywordStore<'a>) {
        self.keywords = KeywordMode::Load { corpus, store };
    }

    /// Lazily yield one instance per occurrence, clustered by source pattern
    pub fn extract(&self) -> impl Iterator<Item = Result<ContextInstance>> + '_ {
        patterns_with_indexes(
            self.model,
            self.source_model,
            self.target_model,
            self.ranking_field,
        )
        .flat_map(move |(source, occurrences)| self.instances(source, occurrences))
    }

    fn keywords_for(&self, source: &Pattern, occurrences: &[Occurrence]) -> Result<Vec<Keyword>> {
        match &self.keywords {
            KeywordMode::Off => Ok(Vec::new()),
            KeywordMode::Mine {
                corpus,
                global_counts,
                options,
                store,
            } => {
                let keywords = mine_keywords(source, occurrences, corpus, global_counts, options);
                if let Some(store) = store {
                    store.write(source, &keywords)?;
                }
                Ok(keywords)
            }
            KeywordMode::Load { store, .. } => store.read(source),
        }
    }

    fn instances(&self, source: &Pattern, occurrences: Vec<Occurrence>) -> Vec<Result<ContextInstance>> {
        let keywords = match self.keywords_for(source, &occurrences) {
            Ok(keywords) => keywords,
            Err(e) => return vec![Err(e)],
        };
        let corpus = match &self.keywords {
            KeywordMode::Mine { corpus, .. } | KeywordMode::Load { corpus, .. } => Some(*corpus),
            KeywordMode::Off => None,
        };
        occurrences
            .into_iter()
            .map(|occurrence| {
                let context =
                    self.windows
                        .extract(occurrence.sentence, occurrence.token, source.len())?;
                let keywords = corpus
                    .map(|c| keyword_flags(c, occurrence.sentence, &keywords))
                    .unwrap_or_default();
                Ok(ContextInstance {
                    occurrence,
                    context,
                    keywords,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::Vocabulary;

    #[test]
    fn test_window_at_sentence_start() {
        let mut vocab = Vocabulary::new();
        vocab.build_from_text("a b c".as_bytes()).unwrap();
        let corpus = IndexedCorpus::from_reader("a b c".as_bytes(), &vocab).unwrap();
        let window = extract_window(&corpus, 0, 0, 1, 2, true, 1).unwrap();
        assert_eq!(
            window,
            vec![
                Pattern::begin_marker(),
                Pattern::begin_marker(),
                vocab.build_pattern("a"),
                vocab.build_pattern("b"),
            ]
        );
    }

    #[test]
    fn test_window_at_sentence_end() {
        let mut vocab = Vocabulary::new();
        vocab.build_from_text("a b c".as_bytes()).unwrap();
        let corpus = IndexedCorpus::from_reader("a b c".as_bytes(), &vocab).unwrap();
        let window = extract_window(&corpus, 0, 1, 2, 1, false, 2).unwrap();
        assert_eq!(
            window,
            vec![
                vocab.build_pattern("a"),
                Pattern::end_marker(),
                Pattern::end_marker()
            ]
        );
    }

    #[test]
    fn test_window_invalid() {
        let mut vocab = Vocabulary::new();
        vocab.build_from_text("a b c".as_bytes()).unwrap();
        let corpus = IndexedCorpus::from_reader("a b c".as_bytes(), &vocab).unwrap();
        assert!(matches!(
            extract_window(&corpus, 7, 0, 1, 1, true, 1),
            Err(Error::InvalidWindow(_))
        ));
        assert!(matches!(
            extract_window(&corpus, 0, 2, 2, 1, true, 1),
            Err(Error::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_context_windows_slot_count() {
        let mut conf = FeatureConfiguration::new();
        conf.add_context_feature("/tmp/words.cls", 1, true, 1);
        let corpus = IndexedCorpus::default();
        assert!(ContextWindows::new(&conf, vec![]).is_err());
        assert!(ContextWindows::new(&conf, vec![&corpus]).is_ok());
        assert!(ContextWindows::new(&conf, vec![&corpus, &corpus]).is_err());
    }
}
