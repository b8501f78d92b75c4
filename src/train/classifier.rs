use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{open_existing, Error, Result};

/// A trained classifier mapping context features to target labels
pub trait Classifier {
    /// Probability distribution over labels, most probable first
    ///
    /// An empty distribution means the classifier has no opinion.
    fn classify(&self, features: &[String]) -> Result<Vec<(String, f64)>>;
}

/// Trains and loads classifiers from training files
pub trait ClassifierBackend {
    type Classifier: Classifier;

    /// Train a classifier from a training file and persist it next to it
    fn train(&self, training_file: &Path) -> Result<()>;

    /// Load the classifier of a training file, `None` if there is none
    fn load(&self, training_file: &Path) -> Result<Option<Self::Classifier>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Exemplar {
    features: Vec<String>,
    /// Accumulated weight per label
    labels: BTreeMap<String, f64>,
}

/// Memory-based classifier: nearest neighbour under the overlap metric
///
/// Identical feature vectors are merged into one exemplar with per-label
/// weights. Classification takes all exemplars at the smallest distance
/// (k = 1) and normalizes their label weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryClassifier {
    exemplars: Vec<Exemplar>,
    /// Exemplar index by feature vector
    #[serde(skip)]
    index: HashMap<Vec<String>, usize>,
}

impl MemoryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a weighted instance
    ///
    /// Instances of weight zero carry no evidence and are left out.
    pub fn append(&mut self, features: Vec<String>, label: &str, weight: f64) -> Result<()> {
        if weight < 0.0 || !weight.is_finite() {
            return Err(Error::invalid_input(format!(
                "instance weight must not be negative, got {}",
                weight
            )));
        }
        if weight == 0.0 {
            log::debug!("Skipping zero-weight instance of {:?}", label);
            return Ok(());
        }
        match self.index.get(&features).copied() {
            Some(i) => {
                *self.exemplars[i].labels.entry(label.to_string()).or_insert(0.0) += weight
            }
            None => {
                let mut labels = BTreeMap::new();
                labels.insert(label.to_string(), weight);
                self.index.insert(features.clone(), self.exemplars.len());
                self.exemplars.push(Exemplar { features, labels });
            }
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .exemplars
            .iter()
            .enumerate()
            .map(|(i, e)| (e.features.clone(), i))
            .collect();
    }

    /// Read a training file of tab-separated features followed by the label
    ///
    /// With `weighted` set, the last column is the exemplar weight.
    pub fn from_training_file<R: BufRead>(reader: R, weighted: bool) -> Result<Self> {
        let mut classifier = Self::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut fields: Vec<&str> = line.split('\t').collect();
            let weight = if weighted {
                let column = fields.pop().unwrap_or_default();
                column.parse::<f64>().map_err(|_| {
                    Error::invalid_input(format!("invalid weight {:?} on line {}", column, i + 1))
                })?
            } else {
                1.0
            };
            let label = fields
                .pop()
                .ok_or_else(|| Error::invalid_input(format!("no label on line {}", i + 1)))?;
            let features = fields.into_iter().map(str::to_string).collect();
            classifier.append(features, label, weight)?;
        }
        Ok(classifier)
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(open_existing(path.as_ref())?);
        let mut classifier: Self = bincode::deserialize_from(reader)?;
        classifier.rebuild_index();
        Ok(classifier)
    }
}

fn overlap_distance(a: &[String], b: &[String]) -> usize {
    let mismatches = a.iter().zip(b).filter(|(x, y)| x != y).count();
    mismatches + a.len().abs_diff(b.len())
}

impl Classifier for MemoryClassifier {
    fn classify(&self, features: &[String]) -> Result<Vec<(String, f64)>> {
        let Some(best) = self
            .exemplars
            .iter()
            .map(|e| overlap_distance(&e.features, features))
            .min()
        else {
            return Ok(Vec::new());
        };
        let mut votes: HashMap<&str, f64> = HashMap::new();
        for exemplar in &self.exemplars {
            if overlap_distance(&exemplar.features, features) != best {
                continue;
            }
            for (label, weight) in &exemplar.labels {
                *votes.entry(label.as_str()).or_insert(0.0) += weight;
            }
        }
        let total: f64 = votes.values().sum();
        let mut distribution: Vec<(String, f64)> = votes
            .into_iter()
            .map(|(label, weight)| (label.to_string(), weight / total))
            .collect();
        distribution.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(distribution)
    }
}

/// Backend storing [`MemoryClassifier`]s as `.ibase` files beside the training data
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend {
    weighted: bool,
}

impl MemoryBackend {
    /// `weighted` tells whether training files carry a weight column
    pub fn new(weighted: bool) -> Self {
        Self { weighted }
    }

    pub fn instance_base_path(training_file: &Path) -> PathBuf {
        training_file.with_extension("ibase")
    }

    fn read_training_file(&self, training_file: &Path) -> Result<MemoryClassifier> {
        let reader = BufReader::new(open_existing(training_file)?);
        MemoryClassifier::from_training_file(reader, self.weighted)
    }
}

impl ClassifierBackend for MemoryBackend {
    type Classifier = MemoryClassifier;

    fn train(&self, training_file: &Path) -> Result<()> {
        let classifier = self.read_training_file(training_file)?;
        log::info!(
            "Trained {} with {} exemplars",
            training_file.display(),
            classifier.len()
        );
        classifier.save(Self::instance_base_path(training_file))
    }

    fn load(&self, training_file: &Path) -> Result<Option<MemoryClassifier>> {
        let instance_base = Self::instance_base_path(training_file);
        if instance_base.exists() {
            return MemoryClassifier::load(instance_base).map(Some);
        }
        if training_file.exists() {
            return self.read_training_file(training_file).map(Some);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_nearest() {
        let mut classifier = MemoryClassifier::new();
        classifier.append(features(&["the", "river"]), "oever", 1.0).unwrap();
        classifier.append(features(&["my", "account"]), "rekening", 1.0).unwrap();
        let distribution = classifier.classify(&features(&["a", "river"])).unwrap();
        assert_eq!(distribution, vec![("oever".to_string(), 1.0)]);
    }

    #[test]
    fn test_classify_weighted_tie() {
        let mut classifier = MemoryClassifier::new();
        classifier.append(features(&["x"]), "a", 3.0).unwrap();
        classifier.append(features(&["x"]), "b", 1.0).unwrap();
        assert_eq!(classifier.len(), 1);
        let distribution = classifier.classify(&features(&["x"])).unwrap();
        assert_eq!(distribution[0], ("a".to_string(), 0.75));
        assert_eq!(distribution[1], ("b".to_string(), 0.25));
    }

    #[test]
    fn test_zero_weight_skipped() {
        let mut classifier = MemoryClassifier::new();
        classifier.append(features(&["x"]), "a", 0.0).unwrap();
        assert!(classifier.is_empty());
        classifier.append(features(&["x"]), "b", 0.5).unwrap();
        classifier.append(features(&["x"]), "a", 0.0).unwrap();
        let distribution = classifier.classify(&features(&["x"])).unwrap();
        assert_eq!(distribution, vec![("b".to_string(), 1.0)]);

        assert!(classifier.append(features(&["x"]), "a", -1.0).is_err());
        assert!(classifier.append(features(&["x"]), "a", f64::NAN).is_err());
    }

    #[test]
    fn test_training_file_zero_score_occurrence() {
        let data = "the\triver\toever\t1.2\nthe\triver\tbank\t0\n";
        let classifier = MemoryClassifier::from_training_file(data.as_bytes(), true).unwrap();
        assert_eq!(classifier.len(), 1);
        let distribution = classifier.classify(&features(&["the", "river"])).unwrap();
        assert_eq!(distribution, vec![("oever".to_string(), 1.0)]);
    }

    #[test]
    fn test_merge_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.ibase");
        let mut classifier = MemoryClassifier::new();
        classifier.append(features(&["river"]), "oever", 1.0).unwrap();
        classifier.append(features(&["money"]), "rekening", 1.0).unwrap();
        classifier.save(&path).unwrap();

        let mut loaded = MemoryClassifier::load(&path).unwrap();
        assert_eq!(loaded, classifier);
        loaded.append(features(&["river"]), "bank", 1.0).unwrap();
        assert_eq!(loaded.len(), 2);
        let distribution = loaded.classify(&features(&["river"])).unwrap();
        assert_eq!(distribution[0].1, 0.5);
    }

    #[test]
    fn test_classify_empty() {
        let classifier = MemoryClassifier::new();
        assert!(classifier.classify(&features(&["x"])).unwrap().is_empty());
    }

    #[test]
    fn test_training_file() {
        let data = "the\triver\toever\t2\nmy\taccount\trekening\t1\n";
        let classifier = MemoryClassifier::from_training_file(data.as_bytes(), true).unwrap();
        assert_eq!(classifier.len(), 2);
        assert!(MemoryClassifier::from_training_file("a\tb\tx\n".as_bytes(), true).is_err());
        let unweighted = MemoryClassifier::from_training_file("a\tb\n".as_bytes(), false).unwrap();
        assert_eq!(unweighted.len(), 1);
    }

    #[test]
    fn test_backend_train_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let training_file = dir.path().join("bank.train");
        std::fs::write(&training_file, "river\toever\nmoney\trekening\n").unwrap();
        let backend = MemoryBackend::new(false);
        backend.train(&training_file).unwrap();
        assert!(dir.path().join("bank.ibase").exists());
        let classifier = backend.load(&training_file).unwrap().unwrap();
        assert_eq!(classifier.len(), 2);
        assert!(backend.load(&dir.path().join("absent.train")).unwrap().is_none());
    }
}
