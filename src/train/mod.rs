//! Classifier training data
//!
//! This module turns extracted context instances into classifier training
//! files, holds the classifier configuration shared with decoding, and
//! provides the in-process memory-based classifier.

mod builder;
mod classifier;
mod config;

// Re-export public types
pub use self::builder::{
    expert_training_file, TrainingSetBuilder, TrainingSummary, MONOLITHIC_INDEX_FILE,
    MONOLITHIC_TRAIN_FILE,
};
pub use self::classifier::{Classifier, ClassifierBackend, MemoryBackend, MemoryClassifier};
pub use self::config::{ClassifierConfig, Weighting, CONFIG_FILE};
