use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{open_existing, Error, Result};
use crate::pattern::Pattern;
use crate::vocabulary::Vocabulary;

/// Kind of a scalar feature value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Float,
    Int,
    Text,
    /// List of (source index, target index) word alignment pairs
    WordAlignment,
}

/// A single raw value stored in a feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Score(f64),
    Int(i64),
    Text(String),
    Pattern(Pattern),
    Alignment(Vec<(u32, u32)>),
}

/// The raw values attached to one alignment entry
pub type FeatureVector = Vec<FeatureValue>;

impl FeatureValue {
    /// Numeric value of score and integer features
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FeatureValue::Score(v) => Some(v),
            FeatureValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_alignment(&self) -> Option<&[(u32, u32)]> {
        match self {
            FeatureValue::Alignment(pairs) => Some(pairs),
            _ => None,
        }
    }
}

/// Describes one slot of a feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// A scalar value; `score` slots are propagated to the decoder
    Scalar { kind: ValueKind, score: bool },
    /// A classifier context window over the corpus decoded by `decoder`
    Context {
        decoder: PathBuf,
        left: usize,
        focus: bool,
        right: usize,
    },
}

impl Slot {
    /// Number of raw values this slot occupies
    pub fn width(&self) -> usize {
        match *self {
            Slot::Scalar { .. } => 1,
            Slot::Context {
                left, focus, right, ..
            } => left + right + usize::from(focus),
        }
    }

    pub fn is_score(&self) -> bool {
        matches!(self, Slot::Scalar { score: true, .. })
    }

    fn category(&self) -> SlotFilter {
        match *self {
            Slot::Scalar { score: true, .. } => SlotFilter::SCORE,
            Slot::Scalar { score: false, .. } => SlotFilter::FEATURE,
            Slot::Context { .. } => SlotFilter::CONTEXT,
        }
    }
}

bitflags! {
    /// Selects which slots a traversal visits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFilter: u8 {
        /// Scalar slots propagated to the decoder
        const SCORE = 0x01;
        /// Scalar slots kept internally
        const FEATURE = 0x02;
        /// Classifier context slots
        const CONTEXT = 0x04;
        const ALL = 0x07;
    }
}

/// Ordered schema of the values attached to each alignment entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfiguration {
    slots: Vec<Slot>,
}

/// One slot visited by [`FeatureConfiguration::items`]
#[derive(Debug, Clone, Copy)]
pub struct SlotItem<'a> {
    pub index: usize,
    pub slot: &'a Slot,
    /// The slice of raw values belonging to this slot, when values were supplied
    pub values: Option<&'a [FeatureValue]>,
}

/// Iterator walking slots and slicing values in lock-step
pub struct SlotItems<'a> {
    slots: std::iter::Enumerate<std::slice::Iter<'a, Slot>>,
    values: Option<&'a [FeatureValue]>,
    offset: usize,
    filter: SlotFilter,
}

impl<'a> Iterator for SlotItems<'a> {
    type Item = SlotItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, slot) in self.slots.by_ref() {
            let width = slot.width();
            let start = self.offset;
            self.offset += width;
            if !self.filter.intersects(slot.category()) {
                continue;
            }
            let values = self.values.map(|v| &v[start..start + width]);
            return Some(SlotItem {
                index,
                slot,
                values,
            });
        }
        None
    }
}

impl FeatureConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scalar slot propagated to the decoder
    pub fn add_score_feature(&mut self, kind: ValueKind) {
        self.slots.push(Slot::Scalar { kind, score: true });
    }

    /// Append a scalar slot that is not propagated to the decoder
    pub fn add_feature(&mut self, kind: ValueKind) {
        self.slots.push(Slot::Scalar { kind, score: false });
    }

    /// Append a classifier context slot
    pub fn add_context_feature<P: Into<PathBuf>>(
        &mut self,
        decoder: P,
        left: usize,
        focus: bool,
        right: usize,
    ) {
        self.slots.push(Slot::Context {
            decoder: decoder.into(),
            left,
            focus,
            right,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Total number of raw values a conforming vector holds
    pub fn width(&self) -> usize {
        self.slots.iter().map(Slot::width).sum()
    }

    pub fn score_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Scalar { score: true, .. }))
            .count()
    }

    pub fn context_slots(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Context { .. }))
    }

    /// Check that a vector conforms to this configuration
    pub fn check(&self, values: &[FeatureValue]) -> Result<()> {
        let width = self.width();
        if values.len() != width {
            return Err(Error::schema(format!(
                "feature vector holds {} values, configuration expects {}",
                values.len(),
                width
            )));
        }
        Ok(())
    }

    /// Traverse the slots selected by `filter`
    ///
    /// When `values` is given it must conform to the configuration; each item
    /// then carries the slice of values belonging to its slot.
    pub fn items<'a>(
        &'a self,
        filter: SlotFilter,
        values: Option<&'a [FeatureValue]>,
    ) -> Result<SlotItems<'a>> {
        if let Some(values) = values {
            self.check(values)?;
        }
        Ok(SlotItems {
            slots: self.slots.iter().enumerate(),
            values,
            offset: 0,
            filter,
        })
    }

    /// Render values as strings, decoding patterns through `decoders`
    pub fn render(
        &self,
        values: &[FeatureValue],
        filter: SlotFilter,
        decoders: &DecoderCache,
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(values.len());
        for item in self.items(filter, Some(values))? {
            let slot_values = item.values.unwrap_or(&[]);
            let decoder = match item.slot {
                Slot::Context { decoder, .. } => Some(decoders.get(decoder).ok_or_else(|| {
                    Error::schema(format!("decoder {} is not loaded", decoder.display()))
                })?),
                Slot::Scalar { .. } => None,
            };
            for value in slot_values {
                let rendered = render_value(value, decoder.map(|d| &**d));
                if rendered.is_empty() {
                    return Err(Error::schema(format!(
                        "empty rendering for feature slot {}",
                        item.index
                    )));
                }
                out.push(rendered);
            }
        }
        Ok(out)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(open_existing(path.as_ref())?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Render a single value; patterns need a decoder
pub fn render_value(value: &FeatureValue, decoder: Option<&Vocabulary>) -> String {
    match value {
        FeatureValue::Score(v) => v.to_string(),
        FeatureValue::Int(v) => v.to_string(),
        FeatureValue::Text(s) => s.clone(),
        FeatureValue::Pattern(p) => match decoder {
            Some(decoder) => decoder.render(p),
            None => p.to_key(),
        },
        FeatureValue::Alignment(pairs) => pairs
            .iter()
            .map(|(s, t)| format!("{}-{}", s, t))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Loaded decoders keyed by the class file they were read from
#[derive(Debug, Clone, Default)]
pub struct DecoderCache {
    decoders: HashMap<PathBuf, Rc<Vocabulary>>,
}

impl DecoderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already loaded vocabulary under its filename
    pub fn insert(&mut self, vocab: Rc<Vocabulary>) -> Result<()> {
        let path = vocab
            .filename()
            .ok_or_else(|| Error::invalid_input("vocabulary has no filename"))?
            .to_path_buf();
        self.decoders.insert(path, vocab);
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&Rc<Vocabulary>> {
        self.decoders.get(path)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Resolve every decoder referenced by `conf`
    ///
    /// Cached handles win, then `preloaded` vocabularies with a matching
    /// filename, and only then is the class file read from disk.
    pub fn load_decoders(
        &mut self,
        conf: &FeatureConfiguration,
        preloaded: &[Rc<Vocabulary>],
    ) -> Result<()> {
        for slot in conf.context_slots() {
            let Slot::Context { decoder, .. } = slot else {
                continue;
            };
            if self.decoders.contains_key(decoder) {
                continue;
            }
            let found = preloaded
                .iter()
                .find(|v| v.filename() == Some(decoder.as_path()));
            let vocab = match found {
                Some(vocab) => Rc::clone(vocab),
                None => {
                    log::info!("Loading decoder {}", decoder.display());
                    Rc::new(Vocabulary::load(decoder)?)
                }
            };
            self.decoders.insert(decoder.clone(), vocab);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> FeatureConfiguration {
        let mut conf = FeatureConfiguration::new();
        conf.add_score_feature(ValueKind::Float);
        conf.add_context_feature("words.cls", 2, true, 1);
        conf.add_score_feature(ValueKind::Float);
        conf.add_feature(ValueKind::WordAlignment);
        conf
    }

    #[test]
    fn test_widths() {
        let conf = conf();
        assert_eq!(conf.len(), 4);
        assert_eq!(conf.width(), 7);
        assert_eq!(conf.score_count(), 2);
        assert_eq!(conf.context_slots().count(), 1);
    }

    #[test]
    fn test_items_slices_in_lockstep() {
        let conf = conf();
        let values = vec![
            FeatureValue::Score(0.1),
            FeatureValue::Pattern(Pattern::unigram(5)),
            FeatureValue::Pattern(Pattern::unigram(6)),
            FeatureValue::Pattern(Pattern::unigram(7)),
            FeatureValue::Pattern(Pattern::unigram(8)),
            FeatureValue::Score(0.2),
            FeatureValue::Alignment(vec![(0, 0)]),
        ];
        let items: Vec<_> = conf.items(SlotFilter::ALL, Some(&values)).unwrap().collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[1].values.unwrap().len(), 4);
        assert_eq!(items[2].values.unwrap(), &[FeatureValue::Score(0.2)]);

        let scores: Vec<_> = conf
            .items(SlotFilter::SCORE, Some(&values))
            .unwrap()
            .map(|item| item.index)
            .collect();
        assert_eq!(scores, vec![0, 2]);
    }

    #[test]
    fn test_items_rejects_mismatched_vector() {
        let conf = conf();
        let values = vec![FeatureValue::Score(0.1)];
        let result = conf.items(SlotFilter::ALL, Some(&values));
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_render_through_decoder_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.cls");
        let mut vocab = Vocabulary::new();
        let p = vocab.build_pattern_mut("huis");
        vocab.save(&path).unwrap();

        let mut conf = FeatureConfiguration::new();
        conf.add_score_feature(ValueKind::Float);
        conf.add_context_feature(&path, 0, true, 0);

        let mut cache = DecoderCache::new();
        cache.load_decoders(&conf, &[Rc::new(vocab)]).unwrap();
        assert_eq!(cache.len(), 1);

        let values = vec![FeatureValue::Score(0.5), FeatureValue::Pattern(p)];
        let rendered = conf.render(&values, SlotFilter::ALL, &cache).unwrap();
        assert_eq!(rendered, vec!["0.5".to_string(), "huis".to_string()]);
    }

    #[test]
    fn test_render_requires_loaded_decoder() {
        let mut conf = FeatureConfiguration::new();
        conf.add_context_feature("missing.cls", 0, true, 0);
        let values = vec![FeatureValue::Pattern(Pattern::unigram(5))];
        let result = conf.render(&values, SlotFilter::ALL, &DecoderCache::new());
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_featconf_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.colibri.alignmodel-featconf");
        let conf = conf();
        conf.save(&path).unwrap();
        assert_eq!(FeatureConfiguration::load(&path).unwrap(), conf);
    }
}
