use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::corpus::{IndexedCorpus, TokenRef};
use crate::error::{open_existing, Error, Result};
use crate::pattern::{internal_gap_masks, Pattern, MAX_SKIPGRAM_LENGTH};
use crate::vocabulary::Vocabulary;

/// Containment queries shared by all pattern models
pub trait PatternModelInterface {
    fn has(&self, pattern: &Pattern) -> bool;

    fn occurrence_count(&self, pattern: &Pattern) -> usize;
}

/// Options controlling pattern model training
#[derive(Debug, Clone)]
pub struct PatternModelOptions {
    min_tokens: usize,
    max_length: usize,
    do_skipgrams: bool,
    min_skip_types: usize,
}

impl Default for PatternModelOptions {
    fn default() -> Self {
        Self {
            min_tokens: 2,
            max_length: 8,
            do_skipgrams: false,
            min_skip_types: 2,
        }
    }
}

impl PatternModelOptions {
    pub fn min_tokens(&self) -> usize {
        self.min_tokens
    }

    pub fn set_min_tokens(&mut self, min_tokens: usize) -> Result<()> {
        if min_tokens == 0 {
            return Err(Error::invalid_input("min_tokens must be at least 1"));
        }
        self.min_tokens = min_tokens;
        Ok(())
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn set_max_length(&mut self, max_length: usize) -> Result<()> {
        if max_length == 0 {
            return Err(Error::invalid_input("max_length must be at least 1"));
        }
        self.max_length = max_length;
        Ok(())
    }

    pub fn do_skipgrams(&self) -> bool {
        self.do_skipgrams
    }

    pub fn set_do_skipgrams(&mut self, enabled: bool) {
        self.do_skipgrams = enabled;
    }

    pub fn min_skip_types(&self) -> usize {
        self.min_skip_types
    }

    pub fn set_min_skip_types(&mut self, min_skip_types: usize) -> Result<()> {
        if min_skip_types == 0 {
            return Err(Error::invalid_input("min_skip_types must be at least 1"));
        }
        self.min_skip_types = min_skip_types;
        Ok(())
    }
}

/// An unindexed set of patterns with counts, used to constrain other models
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    counts: HashMap<Pattern, usize>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns<'a, I>(patterns: I) -> Self
    where
        I: IntoIterator<Item = &'a Pattern>,
    {
        let mut set = Self::new();
        for pattern in patterns {
            set.add(pattern.clone());
        }
        set
    }

    pub fn add(&mut self, pattern: Pattern) {
        *self.counts.entry(pattern).or_insert(0) += 1;
    }

    pub fn add_count(&mut self, pattern: Pattern, count: usize) {
        *self.counts.entry(pattern).or_insert(0) += count;
    }

    /// Load a phrase list with one phrase per line and an optional `<TAB>count`
    ///
    /// Patterns occurring fewer than `min_tokens` times or longer than
    /// `max_length` (0 = unbounded) are left out.
    pub fn load<P: AsRef<Path>>(
        path: P,
        vocab: &mut Vocabulary,
        min_tokens: usize,
        max_length: usize,
    ) -> Result<Self> {
        let reader = BufReader::new(open_existing(path.as_ref())?);
        let mut set = Self::new();
        for line in reader.lines() {
            let line = line?;
            let (phrase, count) = match line.split_once('\t') {
                Some((phrase, count)) => (
                    phrase,
                    count.trim().parse::<usize>().map_err(|_| {
                        Error::invalid_input(format!("invalid pattern count {:?}", count))
                    })?,
                ),
                None => (line.as_str(), 1),
            };
            let pattern = vocab.build_pattern_mut(phrase);
            if pattern.is_empty() {
                continue;
            }
            set.add_count(pattern, count);
        }
        set.counts.retain(|p, count| {
            *count >= min_tokens && (max_length == 0 || p.len() <= max_length)
        });
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> + '_ {
        self.counts.keys()
    }
}

impl PatternModelInterface for PatternSet {
    fn has(&self, pattern: &Pattern) -> bool {
        self.counts.contains_key(pattern)
    }

    fn occurrence_count(&self, pattern: &Pattern) -> usize {
        self.counts.get(pattern).copied().unwrap_or(0)
    }
}

/// A pattern model recording the position of every occurrence
#[derive(Debug, Clone, Default)]
pub struct IndexedPatternModel {
    index: BTreeMap<Pattern, Vec<TokenRef>>,
}

impl IndexedPatternModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Train over a corpus, optionally keeping only patterns in `constraint`
    pub fn train(
        corpus: &IndexedCorpus,
        options: &PatternModelOptions,
        constraint: Option<&dyn PatternModelInterface>,
    ) -> Self {
        let mut index: HashMap<Pattern, Vec<TokenRef>> = HashMap::new();
        for (sentence, tokens) in corpus.iter() {
            for start in 0..tokens.len() {
                let maxn = options.max_length.min(tokens.len() - start);
                for n in 1..=maxn {
                    let pattern = Pattern::new(tokens[start..start + n].to_vec());
                    if let Some(constraint) = constraint {
                        if !constraint.has(&pattern) {
                            continue;
                        }
                    }
                    index
                        .entry(pattern)
                        .or_default()
                        .push(TokenRef::new(sentence, start as u32));
                }
            }
        }
        index.retain(|_, occurrences| occurrences.len() >= options.min_tokens);

        if options.do_skipgrams {
            let skipgrams = Self::mine_skipgrams(corpus, options, constraint);
            log::debug!("Mined {} skipgrams", skipgrams.len());
            index.extend(skipgrams);
        }

        Self {
            index: index.into_iter().collect(),
        }
    }

    /// Skip-grams with internal gaps, enough occurrences and enough distinct fillers
    fn mine_skipgrams(
        corpus: &IndexedCorpus,
        options: &PatternModelOptions,
        constraint: Option<&dyn PatternModelInterface>,
    ) -> HashMap<Pattern, Vec<TokenRef>> {
        let mut occurrences: HashMap<Pattern, Vec<TokenRef>> = HashMap::new();
        let mut fillers: HashMap<Pattern, HashSet<Pattern>> = HashMap::new();
        for (sentence, tokens) in corpus.iter() {
            for start in 0..tokens.len() {
                let maxn = options
                    .max_length
                    .min(MAX_SKIPGRAM_LENGTH)
                    .min(tokens.len() - start);
                for n in 3..=maxn {
                    let concrete = Pattern::new(tokens[start..start + n].to_vec());
                    for mask in internal_gap_masks(n) {
                        let template = concrete.with_gaps(&mask);
                        if let Some(constraint) = constraint {
                            if !constraint.has(&template) {
                                continue;
                            }
                        }
                        if let Some(filler) = template.fillers(&concrete) {
                            fillers.entry(template.clone()).or_default().insert(filler);
                        }
                        occurrences
                            .entry(template)
                            .or_default()
                            .push(TokenRef::new(sentence, start as u32));
                    }
                }
            }
        }
        occurrences.retain(|template, occs| {
            occs.len() >= options.min_tokens
                && fillers.get(template).map_or(0, HashSet::len) >= options.min_skip_types
        });
        occurrences
    }

    pub fn insert(&mut self, pattern: Pattern, occurrence: TokenRef) {
        self.index.entry(pattern).or_default().push(occurrence);
    }

    /// Occurrences of a pattern in corpus order
    pub fn occurrences(&self, pattern: &Pattern) -> Option<&[TokenRef]> {
        self.index.get(pattern).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> + '_ {
        self.index.keys()
    }

    pub fn skipgrams(&self) -> impl Iterator<Item = &Pattern> + '_ {
        self.index.keys().filter(|p| p.is_skipgram())
    }

    pub fn max_pattern_length(&self) -> usize {
        self.index.keys().map(Pattern::len).max().unwrap_or(0)
    }
}

impl PatternModelInterface for IndexedPatternModel {
    fn has(&self, pattern: &Pattern) -> bool {
        self.index.contains_key(pattern)
    }

    fn occurrence_count(&self, pattern: &Pattern) -> usize {
        self.index.get(pattern).map_or(0, Vec::len)
    }
}
