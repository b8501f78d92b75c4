//! Moses phrase table import and export

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;

use crate::alignmodel::AlignmentModel;
use crate::error::{open_existing, Error, Result};
use crate::feature::{render_value, FeatureConfiguration, FeatureValue, FeatureVector, SlotFilter, ValueKind};
use crate::group::GroupConsecutiveExt;
use crate::pattern::Pattern;
use crate::patternmodel::PatternModelInterface;
use crate::vocabulary::Vocabulary;

const PROGRESS_INTERVAL: usize = 100_000;

/// Options for reading a Moses phrase table
#[derive(Debug, Clone)]
pub struct PhraseTableOptions {
    delimiter: String,
    score_column: usize,
    pts_field: usize,
    pst_field: usize,
    pts_threshold: f64,
    pst_threshold: f64,
    joined_threshold: f64,
    divergence_threshold: f64,
    max_source_length: usize,
    reverse: bool,
}

impl Default for PhraseTableOptions {
    fn default() -> Self {
        Self {
            delimiter: "|||".to_string(),
            score_column: 3,
            pts_field: 2,
            pst_field: 0,
            pts_threshold: 0.0,
            pst_threshold: 0.0,
            joined_threshold: 0.0,
            divergence_threshold: 0.0,
            max_source_length: 0,
            reverse: false,
        }
    }
}

impl PhraseTableOptions {
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn set_delimiter<S: Into<String>>(&mut self, delimiter: S) -> Result<()> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(Error::invalid_input("delimiter must not be empty"));
        }
        self.delimiter = delimiter;
        Ok(())
    }

    /// One-based column holding the scores
    pub fn score_column(&self) -> usize {
        self.score_column
    }

    pub fn set_score_column(&mut self, column: usize) -> Result<()> {
        if column < 3 {
            return Err(Error::invalid_input("score column must be 3 or higher"));
        }
        self.score_column = column;
        Ok(())
    }

    /// Index of p(t|s) in the score vector
    pub fn pts_field(&self) -> usize {
        self.pts_field
    }

    pub fn set_pts_field(&mut self, field: usize) {
        self.pts_field = field;
    }

    /// Index of p(s|t) in the score vector
    pub fn pst_field(&self) -> usize {
        self.pst_field
    }

    pub fn set_pst_field(&mut self, field: usize) {
        self.pst_field = field;
    }

    pub fn pts_threshold(&self) -> f64 {
        self.pts_threshold
    }

    pub fn set_pts_threshold(&mut self, threshold: f64) -> Result<()> {
        self.pts_threshold = check_probability("p(t|s) threshold", threshold)?;
        Ok(())
    }

    pub fn pst_threshold(&self) -> f64 {
        self.pst_threshold
    }

    pub fn set_pst_threshold(&mut self, threshold: f64) -> Result<()> {
        self.pst_threshold = check_probability("p(s|t) threshold", threshold)?;
        Ok(())
    }

    pub fn joined_threshold(&self) -> f64 {
        self.joined_threshold
    }

    pub fn set_joined_threshold(&mut self, threshold: f64) -> Result<()> {
        self.joined_threshold = check_probability("joined threshold", threshold)?;
        Ok(())
    }

    pub fn divergence_threshold(&self) -> f64 {
        self.divergence_threshold
    }

    pub fn set_divergence_threshold(&mut self, threshold: f64) -> Result<()> {
        self.divergence_threshold = check_probability("divergence threshold", threshold)?;
        Ok(())
    }

    pub fn max_source_length(&self) -> usize {
        self.max_source_length
    }

    /// Skip source phrases longer than `length`, 0 means unbounded
    pub fn set_max_source_length(&mut self, length: usize) {
        self.max_source_length = length;
    }

    pub fn reverse(&self) -> bool {
        self.reverse
    }

    /// Swap source and target while reading
    pub fn set_reverse(&mut self, reverse: bool) {
        self.reverse = reverse;
    }
}

fn check_probability(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::invalid_input(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Counters reported by [`AlignmentModel::load_moses_phrase_table`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub added: usize,
    /// Rows dropped by a threshold, length limit, score filter or divergence pruning
    pub skipped: usize,
    /// Rows whose source or target is absent from a constraint model
    pub constrained: usize,
    pub malformed: usize,
}

/// Open a phrase table, transparently decompressing `.gz` and `.bz2` files
pub fn open_phrase_table<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = open_existing(path)?;
    match path.extension().and_then(OsStr::to_str) {
        Some("gz") => Ok(Box::new(BufReader::new(MultiGzDecoder::new(file)))),
        Some("bz2") => Ok(Box::new(BufReader::new(MultiBzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

struct RawRow<'a> {
    source: &'a str,
    target: &'a str,
    scores: Vec<f64>,
    alignment: Option<Vec<(u32, u32)>>,
}

struct Row {
    source: Pattern,
    target: Pattern,
    scores: Vec<f64>,
    alignment: Option<Vec<(u32, u32)>>,
}

enum Verdict {
    Accept(Row),
    Skip,
    Constrained,
    Malformed,
}

fn parse_line<'a>(
    line: &'a str,
    options: &PhraseTableOptions,
) -> std::result::Result<RawRow<'a>, String> {
    let segments: Vec<&str> = line.split(options.delimiter.as_str()).map(str::trim).collect();
    if segments.len() < 3 {
        return Err(format!("expected at least 3 fields, found {}", segments.len()));
    }
    let score_field = segments
        .get(options.score_column - 1)
        .ok_or_else(|| format!("no score column {}", options.score_column))?;
    let scores = score_field
        .split_whitespace()
        .map(|s| s.parse::<f64>().map_err(|_| format!("invalid score {:?}", s)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if scores.is_empty() {
        return Err("no scores".to_string());
    }
    let alignment = match segments.get(options.score_column) {
        Some(field) if !field.is_empty() => Some(parse_alignment(field, options.reverse)?),
        _ => None,
    };
    let (mut source, mut target) = (segments[0], segments[1]);
    if source.is_empty() || target.is_empty() {
        return Err("empty phrase".to_string());
    }
    if options.reverse {
        std::mem::swap(&mut source, &mut target);
    }
    Ok(RawRow {
        source,
        target,
        scores,
        alignment,
    })
}

fn parse_alignment(field: &str, reverse: bool) -> std::result::Result<Vec<(u32, u32)>, String> {
    field
        .split_whitespace()
        .map(|pair| {
            let parsed = pair
                .split_once('-')
                .and_then(|(i, j)| Some((i.parse::<u32>().ok()?, j.parse::<u32>().ok()?)));
            match parsed {
                Some((i, j)) if reverse => Ok((j, i)),
                Some(pair) => Ok(pair),
                None => Err(format!("invalid word alignment {:?}", pair)),
            }
        })
        .collect()
}

/// Threshold checks on the raw score vector; `None` when a field is absent
fn passes_thresholds(scores: &[f64], options: &PhraseTableOptions) -> Option<bool> {
    let pts = if options.pts_threshold > 0.0
        || options.joined_threshold > 0.0
        || options.divergence_threshold > 0.0
    {
        Some(*scores.get(options.pts_field)?)
    } else {
        None
    };
    let pst = if options.pst_threshold > 0.0 || options.joined_threshold > 0.0 {
        Some(*scores.get(options.pst_field)?)
    } else {
        None
    };
    if let Some(pts) = pts {
        if options.pts_threshold > 0.0 && pts < options.pts_threshold {
            return Some(false);
        }
    }
    if let Some(pst) = pst {
        if options.pst_threshold > 0.0 && pst < options.pst_threshold {
            return Some(false);
        }
    }
    if let (Some(pts), Some(pst)) = (pts, pst) {
        if options.joined_threshold > 0.0 && pts * pst < options.joined_threshold {
            return Some(false);
        }
    }
    Some(true)
}

/// Tracks the row shape while committing rows to a model
#[derive(Default)]
struct Shape {
    width: Option<usize>,
    alignments: bool,
}

impl Shape {
    fn commit(&mut self, model: &mut AlignmentModel, row: Row) -> Result<()> {
        match self.width {
            Some(width) if width != row.scores.len() => {
                return Err(Error::schema(format!(
                    "phrase table row has {} scores, earlier rows have {}",
                    row.scores.len(),
                    width
                )));
            }
            Some(_) => {}
            None => self.width = Some(row.scores.len()),
        }
        let mut vector: FeatureVector = row.scores.into_iter().map(FeatureValue::Score).collect();
        match row.alignment {
            Some(alignment) => {
                self.alignments = true;
                vector.push(FeatureValue::Alignment(alignment));
            }
            None if self.alignments => vector.push(FeatureValue::Alignment(Vec::new())),
            None => {}
        }
        model.add(row.source, row.target, vector)
    }
}

impl AlignmentModel {
    /// Stream a Moses phrase table into the model
    ///
    /// Malformed lines are logged and skipped. Rows can be pruned by
    /// probability thresholds, by constraint models on either side, by a
    /// predicate over the raw scores and by divergence from the best p(t|s)
    /// among the options of the same source phrase.
    #[allow(clippy::too_many_arguments)]
    pub fn load_moses_phrase_table<R: BufRead>(
        &mut self,
        reader: R,
        source_vocab: &mut Vocabulary,
        target_vocab: &mut Vocabulary,
        options: &PhraseTableOptions,
        source_constraint: Option<&dyn PatternModelInterface>,
        target_constraint: Option<&dyn PatternModelInterface>,
        score_filter: Option<&dyn Fn(&[f64]) -> bool>,
    ) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let mut shape = Shape::default();
        let mut added = 0;
        let mut pruned = 0;
        {
            let rows = reader.lines().enumerate().filter_map(|(i, line)| {
                let lineno = i + 1;
                if lineno % PROGRESS_INTERVAL == 0 {
                    log::info!("Loading phrase table @{}", lineno);
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(Error::from(e))),
                };
                let verdict = judge_line(
                    &line,
                    options,
                    source_vocab,
                    target_vocab,
                    source_constraint,
                    target_constraint,
                    score_filter,
                );
                match verdict {
                    Ok(Verdict::Accept(row)) => return Some(Ok(row)),
                    Ok(Verdict::Skip) => stats.skipped += 1,
                    Ok(Verdict::Constrained) => stats.constrained += 1,
                    Ok(Verdict::Malformed) => stats.malformed += 1,
                    Err(reason) => {
                        log::warn!("Skipping malformed phrase table line {}: {}", lineno, reason);
                        stats.malformed += 1;
                    }
                }
                None
            });

            if options.divergence_threshold > 0.0 {
                let groups =
                    rows.group_consecutive(|row| row.as_ref().ok().map(|r| r.source.clone()));
                for (_, group) in groups {
                    let group = group.into_iter().collect::<Result<Vec<Row>>>()?;
                    let best = group
                        .iter()
                        .map(|r| r.scores[options.pts_field])
                        .fold(f64::MIN, f64::max);
                    for row in group {
                        if row.scores[options.pts_field] < options.divergence_threshold * best {
                            pruned += 1;
                            continue;
                        }
                        shape.commit(self, row)?;
                        added += 1;
                    }
                }
            } else {
                for row in rows {
                    shape.commit(self, row?)?;
                    added += 1;
                }
            }
        }
        stats.added = added;
        stats.skipped += pruned;

        if let Some(width) = shape.width {
            if shape.alignments {
                for vector in self.vectors_mut() {
                    if vector.len() == width {
                        vector.push(FeatureValue::Alignment(Vec::new()));
                    }
                }
            }
            let mut conf = FeatureConfiguration::new();
            for _ in 0..width {
                conf.add_score_feature(ValueKind::Float);
            }
            if shape.alignments {
                conf.add_feature(ValueKind::WordAlignment);
            }
            self.set_configuration(conf)?;
        }
        log::info!(
            "Loaded phrase table: {} added, {} skipped, {} constrained, {} malformed",
            stats.added,
            stats.skipped,
            stats.constrained,
            stats.malformed
        );
        Ok(stats)
    }

    /// Write the model as a Moses phrase table
    ///
    /// Only score slots are written as scores; a word alignment slot becomes
    /// the fourth column.
    pub fn save_moses_phrase_table<W: Write>(
        &self,
        w: &mut W,
        source_vocab: &Vocabulary,
        target_vocab: &Vocabulary,
    ) -> Result<()> {
        for (source, target, vector) in self.iter() {
            let mut scores = Vec::new();
            let mut alignment = None;
            if self.conf().is_empty() {
                for value in vector {
                    match value {
                        FeatureValue::Alignment(_) => alignment = Some(value),
                        v if v.as_f64().is_some() => scores.push(render_value(v, None)),
                        _ => {}
                    }
                }
            } else {
                for item in self.conf().items(SlotFilter::ALL, Some(vector))? {
                    let values = item.values.unwrap_or(&[]);
                    if item.slot.is_score() {
                        scores.extend(values.iter().map(|v| render_value(v, None)));
                    } else if let Some(value @ FeatureValue::Alignment(_)) = values.first() {
                        alignment = Some(value);
                    }
                }
            }
            write!(
                w,
                "{} ||| {} ||| {}",
                source_vocab.render(source),
                target_vocab.render(target),
                scores.join(" ")
            )?;
            if let Some(alignment) = alignment {
                write!(w, " ||| {}", render_value(alignment, None))?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn judge_line(
    line: &str,
    options: &PhraseTableOptions,
    source_vocab: &mut Vocabulary,
    target_vocab: &mut Vocabulary,
    source_constraint: Option<&dyn PatternModelInterface>,
    target_constraint: Option<&dyn PatternModelInterface>,
    score_filter: Option<&dyn Fn(&[f64]) -> bool>,
) -> std::result::Result<Verdict, String> {
    if line.trim().is_empty() {
        return Ok(Verdict::Malformed);
    }
    let raw = parse_line(line, options)?;
    if options.max_source_length > 0
        && raw.source.split_whitespace().count() > options.max_source_length
    {
        return Ok(Verdict::Skip);
    }
    match passes_thresholds(&raw.scores, options) {
        None => return Err("score vector lacks the probability fields".to_string()),
        Some(false) => return Ok(Verdict::Skip),
        Some(true) => {}
    }
    if let Some(filter) = score_filter {
        if !filter(&raw.scores) {
            return Ok(Verdict::Skip);
        }
    }
    let source = source_vocab.build_pattern_mut(raw.source);
    if let Some(constraint) = source_constraint {
        if !constraint.has(&source) {
            return Ok(Verdict::Constrained);
        }
    }
    let target = target_vocab.build_pattern_mut(raw.target);
    if let Some(constraint) = target_constraint {
        if !constraint.has(&target) {
            return Ok(Verdict::Constrained);
        }
    }
    Ok(Verdict::Accept(Row {
        source,
        target,
        scores: raw.scores,
        alignment: raw.alignment,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let options = PhraseTableOptions::default();
        let row = parse_line("het huis ||| the house ||| 0.5 0.4 0.3 0.2 ||| 0-0 1-1", &options)
            .unwrap();
        assert_eq!(row.source, "het huis");
        assert_eq!(row.target, "the house");
        assert_eq!(row.scores, vec![0.5, 0.4, 0.3, 0.2]);
        assert_eq!(row.alignment, Some(vec![(0, 0), (1, 1)]));

        assert!(parse_line("het huis ||| the house", &options).is_err());
        assert!(parse_line("a ||| b ||| x", &options).is_err());
        assert!(parse_line("a ||| b ||| 0.5 ||| 0+1", &options).is_err());
    }

    #[test]
    fn test_parse_line_reverse() {
        let mut options = PhraseTableOptions::default();
        options.set_reverse(true);
        let row = parse_line("a b ||| c ||| 1 ||| 1-0", &options).unwrap();
        assert_eq!(row.source, "c");
        assert_eq!(row.target, "a b");
        assert_eq!(row.alignment, Some(vec![(0, 1)]));
    }

    #[test]
    fn test_thresholds() {
        let mut options = PhraseTableOptions::default();
        assert_eq!(passes_thresholds(&[0.1], &options), Some(true));
        options.set_pts_threshold(0.5).unwrap();
        assert_eq!(passes_thresholds(&[0.9, 0.9, 0.4, 0.9], &options), Some(false));
        assert_eq!(passes_thresholds(&[0.9, 0.9, 0.6, 0.9], &options), Some(true));
        assert_eq!(passes_thresholds(&[0.9], &options), None);
        options.set_pts_threshold(0.0).unwrap();
        options.set_joined_threshold(0.3).unwrap();
        assert_eq!(passes_thresholds(&[0.5, 0.0, 0.5, 0.0], &options), Some(false));
    }

    #[test]
    fn test_options_validation() {
        let mut options = PhraseTableOptions::default();
        assert!(options.set_divergence_threshold(-0.1).is_err());
        assert!(options.set_pts_threshold(1.5).is_err());
        assert!(options.set_delimiter("").is_err());
        assert!(options.set_score_column(2).is_err());
        assert!(options.set_divergence_threshold(0.5).is_ok());
        assert_eq!(options.divergence_threshold(), 0.5);
    }
}
