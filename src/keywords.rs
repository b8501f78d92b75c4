//! Global context keywords for classifier features

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::corpus::IndexedCorpus;
use crate::error::{Error, Result};
use crate::extract::Occurrence;
use crate::pattern::{ClassId, Pattern, FIRST_WORD_CLASS};
use crate::vocabulary::Vocabulary;

/// A word that is predictive of one translation option
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub word: ClassId,
    pub target: Pattern,
    /// Occurrences of the word in sentences where the target was chosen
    pub count: u32,
    pub score: f64,
}

/// Parameters for keyword mining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordOptions {
    absolute_threshold: u32,
    probability_threshold: f64,
    max_keywords: usize,
}

impl Default for KeywordOptions {
    fn default() -> Self {
        Self {
            absolute_threshold: 3,
            probability_threshold: 1e-9,
            max_keywords: 100,
        }
    }
}

impl KeywordOptions {
    pub fn absolute_threshold(&self) -> u32 {
        self.absolute_threshold
    }

    /// Minimum count of a keyword alongside one target
    pub fn set_absolute_threshold(&mut self, threshold: u32) {
        self.absolute_threshold = threshold;
    }

    pub fn probability_threshold(&self) -> f64 {
        self.probability_threshold
    }

    pub fn set_probability_threshold(&mut self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::invalid_input(
                "keyword probability threshold must be between 0 and 1",
            ));
        }
        self.probability_threshold = threshold;
        Ok(())
    }

    pub fn max_keywords(&self) -> usize {
        self.max_keywords
    }

    pub fn set_max_keywords(&mut self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(Error::invalid_input("max keywords must be at least 1"));
        }
        self.max_keywords = max;
        Ok(())
    }
}

/// Mine keywords for the occurrences of one source pattern
///
/// Words inside the source span itself are not counted. The score of a word
/// `w` for target `t` is `count(w, t) / count(w) * 1 / global(w)`, where
/// `count(w)` is over all local occurrences and `global(w)` over the corpus.
pub fn mine_keywords(
    source: &Pattern,
    occurrences: &[Occurrence],
    corpus: &IndexedCorpus,
    global_counts: &HashMap<ClassId, u32>,
    options: &KeywordOptions,
) -> Vec<Keyword> {
    let mut per_target: BTreeMap<&Pattern, HashMap<ClassId, u32>> = BTreeMap::new();
    let mut local: HashMap<ClassId, u32> = HashMap::new();
    for occurrence in occurrences {
        let Some(tokens) = corpus.sentence(occurrence.sentence) else {
            continue;
        };
        let focus = occurrence.token as usize..occurrence.token as usize + source.len();
        let counts = per_target.entry(&occurrence.target).or_default();
        for (i, &word) in tokens.iter().enumerate() {
            if focus.contains(&i) || word < FIRST_WORD_CLASS {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
            *local.entry(word).or_insert(0) += 1;
        }
    }

    let mut keywords = Vec::new();
    for (target, counts) in per_target {
        for (&word, &count) in &counts {
            if count < options.absolute_threshold {
                continue;
            }
            let global = match global_counts.get(&word) {
                Some(&global) if global > 0 => global,
                _ => continue,
            };
            let score = f64::from(count) / f64::from(local[&word]) / f64::from(global);
            if score > options.probability_threshold {
                keywords.push(Keyword {
                    word,
                    target: target.clone(),
                    count,
                    score,
                });
            }
        }
    }
    keywords.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.word.cmp(&b.word))
            .then_with(|| a.target.cmp(&b.target))
    });
    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.word));
    keywords.truncate(options.max_keywords);
    keywords
}

/// Write keywords as `word<TAB>target<TAB>count<TAB>score` lines
pub fn write_keywords<W: Write>(
    w: &mut W,
    keywords: &[Keyword],
    source_vocab: &Vocabulary,
    target_vocab: &Vocabulary,
) -> Result<()> {
    for keyword in keywords {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            source_vocab.word(keyword.word).unwrap_or("{?}"),
            target_vocab.render(&keyword.target),
            keyword.count,
            keyword.score
        )?;
    }
    Ok(())
}

/// Read keywords written by [`write_keywords`]; unknown words are dropped
pub fn read_keywords<R: BufRead>(
    reader: R,
    source_vocab: &Vocabulary,
    target_vocab: &Vocabulary,
) -> Result<Vec<Keyword>> {
    let mut keywords = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 4 {
            return Err(Error::invalid_input(format!(
                "malformed keyword line {:?}",
                line
            )));
        }
        let Some(word) = source_vocab.class(fields[0]) else {
            log::warn!("Keyword {:?} is not in the source vocabulary", fields[0]);
            continue;
        };
        let count = fields[2]
            .parse()
            .map_err(|_| Error::invalid_input(format!("invalid keyword count {:?}", fields[2])))?;
        let score = fields[3]
            .parse()
            .map_err(|_| Error::invalid_input(format!("invalid keyword score {:?}", fields[3])))?;
        keywords.push(Keyword {
            word,
            target: target_vocab.build_pattern(fields[1]),
            count,
            score,
        });
    }
    Ok(keywords)
}

/// Keyword files of one working directory, one file per source pattern
#[derive(Debug, Clone, Copy)]
pub struct KeywordStore<'a> {
    pub workdir: &'a Path,
    pub source_vocab: &'a Vocabulary,
    pub target_vocab: &'a Vocabulary,
}

impl<'a> KeywordStore<'a> {
    pub fn path(&self, source: &Pattern) -> PathBuf {
        self.workdir
            .join(format!("{}.keywords", self.source_vocab.render_escaped(source)))
    }

    pub fn write(&self, source: &Pattern, keywords: &[Keyword]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(self.path(source))?);
        write_keywords(&mut writer, keywords, self.source_vocab, self.target_vocab)?;
        writer.flush()?;
        Ok(())
    }

    /// Read the keywords of a source pattern; a missing file means none
    pub fn read(&self, source: &Pattern) -> Result<Vec<Keyword>> {
        let path = self.path(source);
        if !path.exists() {
            log::debug!("No keywords for {}", self.source_vocab.render(source));
            return Ok(Vec::new());
        }
        read_keywords(
            BufReader::new(File::open(path)?),
            self.source_vocab,
            self.target_vocab,
        )
    }
}
