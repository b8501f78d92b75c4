//! Phrase alignment models and source-context classifiers for phrase-based
//! machine translation
//!
//! An [`AlignmentModel`] maps source phrases to target phrases with a vector
//! of scores and features per pair. It is built from a Moses phrase table,
//! persisted to a compact keys/values file pair and cross-referenced with
//! tokenised corpora to extract local context. That context is used to train
//! classifiers per source phrase, whose output re-ranks translation options
//! at decode time.
//!
//! # Examples
//!
//! ## Converting a phrase table
//!
//! ```no_run
//! use colibrimt::{open_phrase_table, AlignmentModel, PhraseTableOptions, Vocabulary};
//!
//! let mut source_vocab = Vocabulary::new();
//! let mut target_vocab = Vocabulary::new();
//! let mut options = PhraseTableOptions::default();
//! options.set_divergence_threshold(0.5)?;
//!
//! let mut model = AlignmentModel::new();
//! let reader = open_phrase_table("phrase-table.gz")?;
//! let stats = model.load_moses_phrase_table(
//!     reader,
//!     &mut source_vocab,
//!     &mut target_vocab,
//!     &options,
//!     None,
//!     None,
//!     None,
//! )?;
//! println!("{} pairs added", stats.added);
//!
//! model.normalize("s-t-")?;
//! model.save("model")?;
//! source_vocab.save("model.source.cls")?;
//! target_vocab.save("model.target.cls")?;
//! # Ok::<(), colibrimt::Error>(())
//! ```
//!
//! ## Querying a model
//!
//! ```no_run
//! use colibrimt::{AlignmentModel, Vocabulary};
//!
//! let model = AlignmentModel::load("model")?;
//! let source_vocab = Vocabulary::load("model.source.cls")?;
//! let target_vocab = Vocabulary::load("model.target.cls")?;
//!
//! let source = source_vocab.build_pattern("het huis");
//! for target in model.target_patterns(Some(&source)) {
//!     let scores = model.get(&source, target);
//!     println!("{} {:?}", target_vocab.render(target), scores);
//! }
//! # Ok::<(), colibrimt::Error>(())
//! ```

mod alignmodel;
mod corpus;
mod decode;
mod error;
mod extract;
mod feature;
mod group;
mod keywords;
mod moses;
mod pattern;
mod patternmodel;
mod phrasetable;
mod skipgram;
mod vocabulary;

/// Classifier training files, configuration and the memory-based classifier
pub mod train;

// Re-export main types
pub use self::alignmodel::{AlignmentModel, ModelPaths};
pub use self::corpus::{IndexedCorpus, TokenRef};
pub use self::decode::{
    train_classifiers, ClassifierCache, ContextMoses, DecodeOptions, ScoreHandling,
    PHRASE_TABLE_FILE,
};
pub use self::error::{Error, Result};
pub use self::extract::{
    extract_window, keyword_flags, patterns_with_indexes, ContextExtractor, ContextInstance,
    ContextWindows, Occurrence,
};
pub use self::feature::{
    render_value, DecoderCache, FeatureConfiguration, FeatureValue, FeatureVector, Slot,
    SlotFilter, SlotItem, SlotItems, ValueKind,
};
pub use self::group::{GroupConsecutive, GroupConsecutiveExt};
pub use self::keywords::{
    mine_keywords, read_keywords, write_keywords, Keyword, KeywordOptions, KeywordStore,
};
pub use self::moses::{run_decoder, MosesConfig};
pub use self::pattern::{
    ClassId, Pattern, BEGIN_CLASS, END_CLASS, FIRST_WORD_CLASS, MAX_SKIPGRAM_LENGTH, SKIP_CLASS,
    UNKNOWN_CLASS,
};
pub use self::patternmodel::{
    IndexedPatternModel, PatternModelInterface, PatternModelOptions, PatternSet,
};
pub use self::phrasetable::{open_phrase_table, LoadStats, PhraseTableOptions};
pub use self::skipgram::{abstract_skipgrams, SkipgramOptions};
pub use self::vocabulary::{escape_filename, Vocabulary};

// Re-export training types for convenience
pub use self::train::{ClassifierConfig, TrainingSetBuilder, TrainingSummary, Weighting};
