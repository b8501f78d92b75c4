use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{open_existing, Result};
use crate::pattern::{ClassId, Pattern};
use crate::vocabulary::Vocabulary;

/// Position of a token: sentence id and token offset, both zero-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenRef {
    pub sentence: u32,
    pub token: u32,
}

impl TokenRef {
    pub fn new(sentence: u32, token: u32) -> Self {
        Self { sentence, token }
    }
}

/// A tokenised corpus addressable by (sentence, token)
#[derive(Debug, Clone, Default)]
pub struct IndexedCorpus {
    sentences: Vec<Vec<ClassId>>,
}

impl IndexedCorpus {
    /// Encode a tokenised text, one sentence per line
    pub fn from_reader<R: BufRead>(reader: R, vocab: &Vocabulary) -> Result<Self> {
        let mut sentences = Vec::new();
        for line in reader.lines() {
            let line = line?;
            sentences.push(vocab.build_pattern(&line).classes().to_vec());
        }
        Ok(Self { sentences })
    }

    pub fn load<P: AsRef<Path>>(path: P, vocab: &Vocabulary) -> Result<Self> {
        let reader = BufReader::new(open_existing(path.as_ref())?);
        Self::from_reader(reader, vocab)
    }

    pub fn from_sentences<I>(sentences: I) -> Self
    where
        I: IntoIterator<Item = Pattern>,
    {
        Self {
            sentences: sentences
                .into_iter()
                .map(|p| p.classes().to_vec())
                .collect(),
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn sentence_length(&self, sentence: u32) -> Option<usize> {
        self.sentences.get(sentence as usize).map(Vec::len)
    }

    pub fn sentence(&self, sentence: u32) -> Option<&[ClassId]> {
        self.sentences.get(sentence as usize).map(Vec::as_slice)
    }

    pub fn token(&self, sentence: u32, token: u32) -> Option<ClassId> {
        self.sentences
            .get(sentence as usize)
            .and_then(|s| s.get(token as usize))
            .copied()
    }

    pub fn unigram(&self, sentence: u32, token: u32) -> Option<Pattern> {
        self.token(sentence, token).map(Pattern::unigram)
    }

    /// The tokens `[start, end)` of a sentence
    pub fn span(&self, sentence: u32, start: u32, end: u32) -> Option<Pattern> {
        let s = self.sentences.get(sentence as usize)?;
        if start >= end || end as usize > s.len() {
            return None;
        }
        Some(Pattern::new(s[start as usize..end as usize].to_vec()))
    }

    /// Iterate over (sentence id, tokens)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[ClassId])> + '_ {
        self.sentences
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32, s.as_slice()))
    }

    /// Occurrence count of every token class in the corpus
    pub fn unigram_counts(&self) -> HashMap<ClassId, u32> {
        let mut counts = HashMap::new();
        for sentence in &self.sentences {
            for &class in sentence {
                *counts.entry(class).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_lookup() {
        let mut vocab = Vocabulary::new();
        vocab.build_from_text("the big house\nthe palace\n".as_bytes()).unwrap();
        let corpus =
            IndexedCorpus::from_reader("the big house\nthe palace\n".as_bytes(), &vocab).unwrap();
        assert_eq!(corpus.sentence_count(), 2);
        assert_eq!(corpus.sentence_length(0), Some(3));
        assert_eq!(corpus.sentence_length(5), None);
        assert_eq!(corpus.unigram(1, 1), Some(vocab.build_pattern("palace")));
        assert_eq!(corpus.span(0, 1, 3), Some(vocab.build_pattern("big house")));
        assert_eq!(corpus.span(0, 2, 4), None);
        let counts = corpus.unigram_counts();
        assert_eq!(counts[&vocab.class("the").unwrap()], 2);
    }
}
