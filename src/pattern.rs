use std::fmt;

use serde::{Deserialize, Serialize};

/// Class identifier of a single token within a vocabulary
pub type ClassId = u32;

/// Unknown word
pub const UNKNOWN_CLASS: ClassId = 1;
/// Gap position of a skip-gram, matches exactly one arbitrary token
pub const SKIP_CLASS: ClassId = 2;
/// Begin-of-sentence marker
pub const BEGIN_CLASS: ClassId = 3;
/// End-of-sentence marker
pub const END_CLASS: ClassId = 4;
/// First class available for ordinary words
pub const FIRST_WORD_CLASS: ClassId = 5;

/// Longest pattern for which skip-gram templates are enumerated
pub const MAX_SKIPGRAM_LENGTH: usize = 16;

/// An immutable token sequence bound to one vocabulary
///
/// Patterns are ordered by their class ids; that order drives iteration and
/// persistence of every model in this crate.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pattern(Box<[ClassId]>);

impl Pattern {
    pub fn new<T: Into<Box<[ClassId]>>>(classes: T) -> Self {
        Self(classes.into())
    }

    pub fn unigram(class: ClassId) -> Self {
        Self(vec![class].into_boxed_slice())
    }

    /// The begin-of-sentence marker pattern
    pub fn begin_marker() -> Self {
        Self::unigram(BEGIN_CLASS)
    }

    /// The end-of-sentence marker pattern
    pub fn end_marker() -> Self {
        Self::unigram(END_CLASS)
    }

    /// Number of token positions, gaps included
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn classes(&self) -> &[ClassId] {
        &self.0
    }

    /// Returns `true` if any position is a gap
    pub fn is_skipgram(&self) -> bool {
        self.0.iter().any(|&c| c == SKIP_CLASS)
    }

    pub fn is_gap(&self, index: usize) -> bool {
        self.0.get(index) == Some(&SKIP_CLASS)
    }

    /// One flag per position, `true` where the position is a gap
    pub fn gap_mask(&self) -> Vec<bool> {
        self.0.iter().map(|&c| c == SKIP_CLASS).collect()
    }

    /// Whether this template matches the given concrete pattern
    ///
    /// Both must have the same length and every non-gap position must agree.
    pub fn subsumes(&self, concrete: &Pattern) -> bool {
        self.len() == concrete.len()
            && self
                .0
                .iter()
                .zip(concrete.0.iter())
                .all(|(&t, &c)| t == SKIP_CLASS || t == c)
    }

    pub fn slice(&self, start: usize, end: usize) -> Option<Pattern> {
        if start >= end || end > self.len() {
            return None;
        }
        Some(Pattern::new(self.0[start..end].to_vec()))
    }

    /// The tokens covered by the gaps of this template in `concrete`
    pub fn fillers(&self, concrete: &Pattern) -> Option<Pattern> {
        if !self.subsumes(concrete) {
            return None;
        }
        let filled: Vec<ClassId> = self
            .0
            .iter()
            .zip(concrete.0.iter())
            .filter(|(&t, _)| t == SKIP_CLASS)
            .map(|(_, &c)| c)
            .collect();
        if filled.is_empty() {
            None
        } else {
            Some(Pattern::new(filled))
        }
    }

    /// Replace the positions selected by `mask` with gaps
    pub fn with_gaps(&self, mask: &[bool]) -> Pattern {
        let classes: Vec<ClassId> = self
            .0
            .iter()
            .zip(mask.iter())
            .map(|(&c, &gap)| if gap { SKIP_CLASS } else { c })
            .collect();
        Pattern::new(classes)
    }

    /// Compact textual key, used for the alignment model key index
    pub fn to_key(&self) -> String {
        let mut key = String::with_capacity(self.len() * 4);
        for (i, class) in self.0.iter().enumerate() {
            if i > 0 {
                key.push(' ');
            }
            key.push_str(&class.to_string());
        }
        key
    }

    pub fn from_key(key: &str) -> Option<Pattern> {
        let classes: Option<Vec<ClassId>> = key
            .split(' ')
            .map(|part| part.parse::<ClassId>().ok())
            .collect();
        match classes {
            Some(classes) if !classes.is_empty() => Some(Pattern::new(classes)),
            _ => None,
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern[{}]", self.to_key())
    }
}

/// All gap masks with gaps at internal positions only, excluding the empty mask
///
/// Empty for patterns shorter than three or longer than [`MAX_SKIPGRAM_LENGTH`].
pub(crate) fn internal_gap_masks(len: usize) -> Vec<Vec<bool>> {
    let mut masks = Vec::new();
    if !(3..=MAX_SKIPGRAM_LENGTH).contains(&len) {
        return masks;
    }
    let inner = len - 2;
    for bits in 1u32..(1u32 << inner) {
        let mut mask = vec![false; len];
        for (i, slot) in mask.iter_mut().enumerate().skip(1).take(inner) {
            *slot = bits & (1 << (i - 1)) != 0;
        }
        masks.push(mask);
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsumes() {
        let concrete = Pattern::new(vec![5, 6, 7]);
        let template = Pattern::new(vec![5, SKIP_CLASS, 7]);
        assert!(template.subsumes(&concrete));
        assert!(!template.subsumes(&Pattern::new(vec![5, 6, 8])));
        assert!(!template.subsumes(&Pattern::new(vec![5, 6])));
        assert_eq!(template.fillers(&concrete), Some(Pattern::unigram(6)));
        assert!(template.is_skipgram());
        assert_eq!(template.gap_mask(), vec![false, true, false]);
    }

    #[test]
    fn test_key_roundtrip() {
        let p = Pattern::new(vec![5, 12, 300]);
        assert_eq!(p.to_key(), "5 12 300");
        assert_eq!(Pattern::from_key("5 12 300"), Some(p));
        assert_eq!(Pattern::from_key(""), None);
        assert_eq!(Pattern::from_key("5 x"), None);
    }

    #[test]
    fn test_internal_gap_masks() {
        assert!(internal_gap_masks(2).is_empty());
        assert_eq!(internal_gap_masks(3), vec![vec![false, true, false]]);
        let masks = internal_gap_masks(4);
        assert_eq!(masks.len(), 3);
        assert!(masks.iter().all(|m| !m[0] && !m[3]));
        assert_eq!(
            internal_gap_masks(MAX_SKIPGRAM_LENGTH).len(),
            (1 << (MAX_SKIPGRAM_LENGTH - 2)) - 1
        );
        assert!(internal_gap_masks(MAX_SKIPGRAM_LENGTH + 1).is_empty());
        assert!(internal_gap_masks(40).is_empty());
    }
}
