use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use cqdb::{CQDBWriter, CQDB};
use serde::{Deserialize, Serialize};

use crate::error::{open_existing, Error, Result};
use crate::feature::{render_value, DecoderCache, FeatureConfiguration, FeatureValue, FeatureVector, SlotFilter};
use crate::pattern::Pattern;
use crate::patternmodel::PatternSet;
use crate::vocabulary::Vocabulary;

const KEYS_SUFFIX: &str = ".colibri.alignmodel-keys";
const VALUES_SUFFIX: &str = ".colibri.alignmodel-values";
const FEATCONF_SUFFIX: &str = ".colibri.alignmodel-featconf";

/// The three files sharing an alignment model prefix
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub keys: PathBuf,
    pub values: PathBuf,
    pub featconf: PathBuf,
}

impl ModelPaths {
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        let prefix = prefix.as_ref().to_string_lossy();
        Self {
            keys: PathBuf::from(format!("{}{}", prefix, KEYS_SUFFIX)),
            values: PathBuf::from(format!("{}{}", prefix, VALUES_SUFFIX)),
            featconf: PathBuf::from(format!("{}{}", prefix, FEATCONF_SUFFIX)),
        }
    }
}

#[derive(Serialize)]
struct StoredValuesRef<'a> {
    multivalue: bool,
    values: Vec<&'a Vec<FeatureVector>>,
}

#[derive(Deserialize)]
struct StoredValues {
    multivalue: bool,
    values: Vec<Vec<FeatureVector>>,
}

/// Normalization operation applied to one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NormOp {
    /// Divide by the total over all pairs sharing the target
    BySource,
    /// Divide by the total over all pairs sharing the source
    ByTarget,
    Zero,
    Keep,
}

fn parse_directive(directive: &str) -> Result<Vec<NormOp>> {
    directive
        .chars()
        .map(|c| match c {
            's' => Ok(NormOp::BySource),
            't' => Ok(NormOp::ByTarget),
            '0' => Ok(NormOp::Zero),
            '-' => Ok(NormOp::Keep),
            other => Err(Error::invalid_input(format!(
                "invalid normalization directive character {:?}",
                other
            ))),
        })
        .collect()
}

fn pair_key(source: &Pattern, target: &Pattern) -> String {
    format!("{}\t{}", source.to_key(), target.to_key())
}

/// Check that a written keys file is a complete database of `expected` pairs
fn verify_keys(keys: &[u8], expected: usize) -> Result<()> {
    let db = CQDB::new(keys)?;
    if db.num() as usize != expected {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("keys file holds {} pairs, {} written", db.num(), expected),
        )));
    }
    Ok(())
}

fn parse_pair_key(key: &str) -> Result<(Pattern, Pattern)> {
    let (source, target) = key
        .split_once('\t')
        .ok_or_else(|| Error::schema(format!("malformed pattern pair key {:?}", key)))?;
    match (Pattern::from_key(source), Pattern::from_key(target)) {
        (Some(source), Some(target)) => Ok((source, target)),
        _ => Err(Error::schema(format!("malformed pattern pair key {:?}", key))),
    }
}

/// Bidirectional store of (source pattern, target pattern) -> feature vector
///
/// Vectors live in an arena; the key index maps every pair to its arena slot.
/// In multivalue mode each slot accumulates candidate vectors until
/// [`AlignmentModel::resolve_candidates`] collapses them.
#[derive(Debug, Clone, Default)]
pub struct AlignmentModel {
    index: BTreeMap<Pattern, BTreeMap<Pattern, usize>>,
    values: Vec<Vec<FeatureVector>>,
    multivalue: bool,
    conf: FeatureConfiguration,
}

impl AlignmentModel {
    /// Create an empty single-value model; later adds overwrite
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty model that accumulates candidate vectors per pair
    pub fn multivalued() -> Self {
        Self {
            multivalue: true,
            ..Self::default()
        }
    }

    pub fn with_configuration(conf: FeatureConfiguration) -> Self {
        Self {
            conf,
            ..Self::default()
        }
    }

    pub fn is_multivalue(&self) -> bool {
        self.multivalue
    }

    pub fn conf(&self) -> &FeatureConfiguration {
        &self.conf
    }

    /// Replace the feature configuration after checking every stored vector
    pub fn set_configuration(&mut self, conf: FeatureConfiguration) -> Result<()> {
        if !conf.is_empty() {
            for candidates in &self.values {
                for vector in candidates {
                    conf.check(vector)?;
                }
            }
        }
        self.conf = conf;
        Ok(())
    }

    /// Insert or append a value for the (source, target) key
    pub fn add(&mut self, source: Pattern, target: Pattern, value: FeatureVector) -> Result<()> {
        if !self.conf.is_empty() {
            self.conf.check(&value)?;
        }
        let targets = self.index.entry(source).or_default();
        match targets.get(&target) {
            Some(&slot) => {
                let candidates = &mut self.values[slot];
                if self.multivalue {
                    candidates.push(value);
                } else {
                    *candidates = vec![value];
                }
            }
            None => {
                targets.insert(target, self.values.len());
                self.values.push(vec![value]);
            }
        }
        Ok(())
    }

    /// Collapse every candidate list into a single vector
    pub fn resolve_candidates<F>(&mut self, mut select: F)
    where
        F: FnMut(&Pattern, &Pattern, Vec<FeatureVector>) -> FeatureVector,
    {
        for (source, targets) in &self.index {
            for (target, &slot) in targets {
                let candidates = std::mem::take(&mut self.values[slot]);
                if candidates.len() <= 1 {
                    self.values[slot] = candidates;
                } else {
                    self.values[slot] = vec![select(source, target, candidates)];
                }
            }
        }
    }

    /// Number of distinct source patterns
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of distinct (source, target) pairs
    pub fn num_pairs(&self) -> usize {
        self.index.values().map(BTreeMap::len).sum()
    }

    pub fn has_pair(&self, source: &Pattern, target: &Pattern) -> bool {
        self.index
            .get(source)
            .map_or(false, |targets| targets.contains_key(target))
    }

    pub fn has_source(&self, source: &Pattern) -> bool {
        self.index.contains_key(source)
    }

    /// All candidate vectors stored for a pair
    pub fn candidates(&self, source: &Pattern, target: &Pattern) -> Option<&[FeatureVector]> {
        let slot = *self.index.get(source)?.get(target)?;
        Some(&self.values[slot])
    }

    /// The current vector of a pair, the most recently added candidate
    pub fn get(&self, source: &Pattern, target: &Pattern) -> Option<&FeatureVector> {
        self.candidates(source, target).and_then(|c| c.last())
    }

    pub fn get_mut(&mut self, source: &Pattern, target: &Pattern) -> Option<&mut FeatureVector> {
        let slot = *self.index.get(source)?.get(target)?;
        self.values[slot].last_mut()
    }

    pub(crate) fn vectors_mut(&mut self) -> impl Iterator<Item = &mut FeatureVector> + '_ {
        self.values.iter_mut().flatten()
    }

    pub fn source_patterns(&self) -> impl Iterator<Item = &Pattern> + '_ {
        self.index.keys()
    }

    /// Target patterns of one source, or of all sources deduplicated
    pub fn target_patterns<'a>(
        &'a self,
        source: Option<&Pattern>,
    ) -> Box<dyn Iterator<Item = &'a Pattern> + 'a> {
        match source {
            Some(source) => match self.index.get(source) {
                Some(targets) => Box::new(targets.keys()),
                None => Box::new(std::iter::empty()),
            },
            None => {
                let all: BTreeSet<&Pattern> =
                    self.index.values().flat_map(BTreeMap::keys).collect();
                Box::new(all.into_iter())
            }
        }
    }

    /// Iterate over (source, target, vector) for every stored candidate
    pub fn iter(&self) -> impl Iterator<Item = (&Pattern, &Pattern, &FeatureVector)> + '_ {
        self.index.iter().flat_map(move |(source, targets)| {
            targets.iter().flat_map(move |(target, &slot)| {
                self.values[slot]
                    .iter()
                    .map(move |vector| (source, target, vector))
            })
        })
    }

    /// Constraint model of all source patterns
    pub fn source_model(&self) -> PatternSet {
        PatternSet::from_patterns(self.source_patterns())
    }

    /// Constraint model of all target patterns
    pub fn target_model(&self) -> PatternSet {
        PatternSet::from_patterns(self.target_patterns(None))
    }

    /// Renormalize score slots according to a per-slot directive
    ///
    /// `'s'` divides by the total over pairs sharing the same target, `'t'` by
    /// the total over pairs sharing the same source, `'0'` zeroes the slot and
    /// `'-'` keeps it. Values whose total is zero are left unchanged. Totals are
    /// always computed from the current values, so a repeated call re-divides.
    pub fn normalize(&mut self, directive: &str) -> Result<()> {
        let ops = parse_directive(directive)?;

        let mut by_target: HashMap<(&Pattern, usize), f64> = HashMap::new();
        let mut by_source: HashMap<(&Pattern, usize), f64> = HashMap::new();
        for (source, targets) in &self.index {
            for (target, &slot) in targets {
                for vector in &self.values[slot] {
                    for (i, op) in ops.iter().enumerate() {
                        let total = match op {
                            NormOp::BySource => by_target.entry((target, i)).or_insert(0.0),
                            NormOp::ByTarget => by_source.entry((source, i)).or_insert(0.0),
                            NormOp::Zero | NormOp::Keep => continue,
                        };
                        *total += numeric(vector, i)?;
                    }
                }
            }
        }

        for (source, targets) in &self.index {
            for (target, &slot) in targets {
                for vector in self.values[slot].iter_mut() {
                    for (i, op) in ops.iter().enumerate() {
                        let total = match op {
                            NormOp::BySource => by_target[&(target, i)],
                            NormOp::ByTarget => by_source[&(source, i)],
                            NormOp::Zero => {
                                vector[i] = FeatureValue::Score(0.0);
                                continue;
                            }
                            NormOp::Keep => continue,
                        };
                        if total != 0.0 {
                            let value = numeric(vector, i)?;
                            vector[i] = FeatureValue::Score(value / total);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the key index, the value arena and the feature configuration
    pub fn save<P: AsRef<Path>>(&self, prefix: P) -> Result<()> {
        let paths = ModelPaths::new(prefix);
        let mut ordered: Vec<&Vec<FeatureVector>> = Vec::with_capacity(self.values.len());
        let mut file = File::create(&paths.keys)?;
        {
            // CQDBWriter writes the database when dropped
            let mut writer = CQDBWriter::new(&mut file)?;
            for (source, targets) in &self.index {
                for (target, &slot) in targets {
                    let id = u32::try_from(ordered.len()).map_err(|_| {
                        Error::invalid_input("number of pattern pairs exceeds u32::MAX")
                    })?;
                    writer.put(pair_key(source, target), id)?;
                    ordered.push(&self.values[slot]);
                }
            }
        }
        file.sync_all()?;
        verify_keys(&fs::read(&paths.keys)?, ordered.len())?;

        let mut writer = BufWriter::new(File::create(&paths.values)?);
        let stored = StoredValuesRef {
            multivalue: self.multivalue,
            values: ordered,
        };
        bincode::serialize_into(&mut writer, &stored)?;
        writer.flush()?;

        if !self.conf.is_empty() {
            self.conf.save(&paths.featconf)?;
        }
        log::info!(
            "Saved alignment model: {} source patterns, {} pairs",
            self.len(),
            self.num_pairs()
        );
        Ok(())
    }

    /// Load a model written by [`AlignmentModel::save`]
    pub fn load<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let paths = ModelPaths::new(prefix);
        if !paths.keys.exists() {
            return Err(Error::MissingFile(paths.keys));
        }
        let keys = fs::read(&paths.keys)?;
        let stored: StoredValues =
            bincode::deserialize_from(BufReader::new(open_existing(&paths.values)?))?;

        let db = CQDB::new(&keys)?;
        let mut index: BTreeMap<Pattern, BTreeMap<Pattern, usize>> = BTreeMap::new();
        for id in 0..stored.values.len() {
            let key = db
                .to_str(id as u32)
                .and_then(|s| s.to_str().ok())
                .ok_or_else(|| Error::schema(format!("no key stored for value id {}", id)))?;
            let (source, target) = parse_pair_key(key)?;
            index.entry(source).or_default().insert(target, id);
        }
        log::info!("Loaded keys: alignments for {} source patterns", index.len());

        let conf = if paths.featconf.exists() {
            FeatureConfiguration::load(&paths.featconf)?
        } else {
            FeatureConfiguration::new()
        };
        let model = Self {
            index,
            values: stored.values,
            multivalue: stored.multivalue,
            conf,
        };
        if !model.conf.is_empty() {
            for (_, _, vector) in model.iter() {
                model.conf.check(vector)?;
            }
        }
        Ok(model)
    }

    /// Write a human readable dump, one tab-separated line per entry
    pub fn write_dump<W: Write>(
        &self,
        w: &mut W,
        source_vocab: &Vocabulary,
        target_vocab: &Vocabulary,
        decoders: &DecoderCache,
    ) -> Result<()> {
        for (source, target, vector) in self.iter() {
            let rendered = if self.conf.is_empty() {
                vector.iter().map(|v| render_value(v, None)).collect()
            } else {
                self.conf.render(vector, SlotFilter::ALL, decoders)?
            };
            writeln!(
                w,
                "{}\t{}\t{}",
                source_vocab.render(source),
                target_vocab.render(target),
                rendered.join("\t")
            )?;
        }
        Ok(())
    }
}

fn numeric(vector: &[FeatureValue], index: usize) -> Result<f64> {
    vector
        .get(index)
        .and_then(FeatureValue::as_f64)
        .ok_or_else(|| {
            Error::schema(format!(
                "slot {} is not numeric in a vector of {} values",
                index,
                vector.len()
            ))
        })
}
