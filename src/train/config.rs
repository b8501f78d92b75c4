use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{open_existing, Error, Result};
use crate::feature::FeatureConfiguration;
use crate::keywords::KeywordOptions;

/// File name of the classifier configuration inside a working directory
pub const CONFIG_FILE: &str = "classifier.conf";

/// How repeated training instances are weighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Repeat the instance line once per occurrence
    #[default]
    Duplicate,
    /// One line with the occurrence count as exemplar weight
    Occurrence,
    /// One line weighted by occurrence count times p(t|s)
    OccurrenceScore,
}

impl Weighting {
    /// Whether training lines carry a trailing weight column
    pub fn is_weighted(self) -> bool {
        !matches!(self, Weighting::Duplicate)
    }
}

/// Settings shared by training-set extraction and decode-time classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub weighting: Weighting,
    /// One joint classifier instead of one expert per source pattern
    pub monolithic: bool,
    /// Minimum number of instances for a source pattern to get a classifier
    pub instance_threshold: usize,
    /// Index of p(t|s) in the alignment model score vector
    pub ranking_field: usize,
    /// Keyword features, disabled when absent
    pub keywords: Option<KeywordOptions>,
    /// Layout of the context features, decoders referenced by path
    pub conf: FeatureConfiguration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weighting: Weighting::default(),
            monolithic: false,
            instance_threshold: 0,
            ranking_field: 2,
            keywords: None,
            conf: FeatureConfiguration::new(),
        }
    }
}

impl ClassifierConfig {
    pub fn new(conf: FeatureConfiguration) -> Self {
        Self {
            conf,
            ..Self::default()
        }
    }

    pub fn path<P: AsRef<Path>>(workdir: P) -> PathBuf {
        workdir.as_ref().join(CONFIG_FILE)
    }

    /// Write `classifier.conf` to the working directory
    pub fn save<P: AsRef<Path>>(&self, workdir: P) -> Result<()> {
        if self.conf.context_slots().count() != self.conf.len() {
            return Err(Error::invalid_input(
                "classifier feature configuration may only hold context slots",
            ));
        }
        let mut writer = BufWriter::new(File::create(Self::path(workdir))?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Read `classifier.conf` from the working directory
    pub fn load<P: AsRef<Path>>(workdir: P) -> Result<Self> {
        let reader = BufReader::new(open_existing(&Self::path(workdir))?);
        Ok(serde_json::from_reader(reader)?)
    }
}
