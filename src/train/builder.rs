use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::config::{ClassifierConfig, Weighting};
use crate::error::Result;
use crate::extract::ContextInstance;
use crate::feature::{DecoderCache, SlotFilter};
use crate::group::GroupConsecutiveExt;
use crate::pattern::Pattern;
use crate::vocabulary::Vocabulary;

pub const MONOLITHIC_TRAIN_FILE: &str = "monolithic.train";
pub const MONOLITHIC_INDEX_FILE: &str = "monolithic.index";

/// Outcome of a training-set build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingSummary {
    /// Source patterns that received training data
    pub written: usize,
    /// Source patterns with a single translation option
    pub skipped_unambiguous: usize,
    /// Source patterns below the instance threshold
    pub skipped_threshold: usize,
}

struct Monolithic {
    train: BufWriter<File>,
    index: BufWriter<File>,
}

/// Writes classifier training files from context instances
pub struct TrainingSetBuilder<'a> {
    workdir: PathBuf,
    config: ClassifierConfig,
    source_vocab: &'a Vocabulary,
    target_vocab: &'a Vocabulary,
    decoders: &'a DecoderCache,
    monolithic: Option<Monolithic>,
    summary: TrainingSummary,
}

/// Path of the expert training file of a source pattern
pub fn expert_training_file(workdir: &Path, source_vocab: &Vocabulary, source: &Pattern) -> PathBuf {
    workdir.join(format!("{}.train", source_vocab.render_escaped(source)))
}

impl<'a> TrainingSetBuilder<'a> {
    /// Prepare the working directory and write `classifier.conf`
    pub fn new<P: Into<PathBuf>>(
        workdir: P,
        config: ClassifierConfig,
        source_vocab: &'a Vocabulary,
        target_vocab: &'a Vocabulary,
        decoders: &'a DecoderCache,
    ) -> Result<Self> {
        let workdir = workdir.into();
        fs::create_dir_all(&workdir)?;
        config.save(&workdir)?;
        let monolithic = if config.monolithic {
            Some(Monolithic {
                train: BufWriter::new(File::create(workdir.join(MONOLITHIC_TRAIN_FILE))?),
                index: BufWriter::new(File::create(workdir.join(MONOLITHIC_INDEX_FILE))?),
            })
        } else {
            None
        };
        Ok(Self {
            workdir,
            config,
            source_vocab,
            target_vocab,
            decoders,
            monolithic,
            summary: TrainingSummary::default(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Consume instances clustered by source pattern
    pub fn build<I>(&mut self, instances: I) -> Result<()>
    where
        I: Iterator<Item = Result<ContextInstance>>,
    {
        let groups =
            instances.group_consecutive(|i| i.as_ref().ok().map(|i| i.occurrence.source.clone()));
        for (source, group) in groups {
            let group = group.into_iter().collect::<Result<Vec<_>>>()?;
            if let Some(source) = source {
                self.add_group(&source, &group)?;
            }
        }
        Ok(())
    }

    /// Write the training data of one source pattern
    pub fn add_group(&mut self, source: &Pattern, instances: &[ContextInstance]) -> Result<()> {
        // (features, label) -> (occurrences, p(t|s))
        let mut counts: BTreeMap<(Vec<String>, String), (usize, f64)> = BTreeMap::new();
        let mut labels = BTreeSet::new();
        for instance in instances {
            let features = self.render_features(instance)?;
            let label = self.target_vocab.render(&instance.occurrence.target);
            labels.insert(label.clone());
            let entry = counts
                .entry((features, label))
                .or_insert((0, instance.occurrence.score));
            entry.0 += 1;
        }

        if labels.len() < 2 {
            log::debug!(
                "Skipping {}: only one translation option",
                self.source_vocab.render(source)
            );
            self.summary.skipped_unambiguous += 1;
            return Ok(());
        }
        if instances.len() < self.config.instance_threshold {
            log::debug!(
                "Skipping {}: {} instances below threshold",
                self.source_vocab.render(source),
                instances.len()
            );
            self.summary.skipped_threshold += 1;
            return Ok(());
        }

        let weighting = self.config.weighting;
        match self.monolithic.as_mut() {
            Some(monolithic) => {
                let surface = self.source_vocab.render(source);
                for ((features, label), (count, score)) in &counts {
                    let mut line = surface.clone();
                    for feature in features {
                        line.push('\t');
                        line.push_str(feature);
                    }
                    write_instance(&mut monolithic.train, &line, label, *count, *score, weighting)?;
                }
                writeln!(monolithic.index, "{}", surface)?;
            }
            None => {
                let path = expert_training_file(&self.workdir, self.source_vocab, source);
                let mut writer = BufWriter::new(File::create(&path)?);
                for ((features, label), (count, score)) in &counts {
                    write_instance(&mut writer, &features.join("\t"), label, *count, *score, weighting)?;
                }
                writer.flush()?;
            }
        }
        self.summary.written += 1;
        Ok(())
    }

    /// Context features rendered as strings, keyword flags appended
    pub fn render_features(&self, instance: &ContextInstance) -> Result<Vec<String>> {
        let mut features = if self.config.conf.is_empty() {
            Vec::new()
        } else {
            self.config
                .conf
                .render(&instance.context, SlotFilter::CONTEXT, self.decoders)?
        };
        features.extend(instance.keywords.iter().map(|&k| u8::from(k).to_string()));
        Ok(features)
    }

    pub fn finish(mut self) -> Result<TrainingSummary> {
        if let Some(monolithic) = self.monolithic.as_mut() {
            monolithic.train.flush()?;
            monolithic.index.flush()?;
        }
        log::info!(
            "Wrote training data for {} source patterns ({} unambiguous, {} below threshold)",
            self.summary.written,
            self.summary.skipped_unambiguous,
            self.summary.skipped_threshold
        );
        Ok(self.summary)
    }
}

fn write_instance<W: Write>(
    w: &mut W,
    features: &str,
    label: &str,
    count: usize,
    score: f64,
    weighting: Weighting,
) -> Result<()> {
    let sep = if features.is_empty() { "" } else { "\t" };
    match weighting {
        Weighting::Duplicate => {
            for _ in 0..count {
                writeln!(w, "{}{}{}", features, sep, label)?;
            }
        }
        Weighting::Occurrence => writeln!(w, "{}{}{}\t{}", features, sep, label, count)?,
        Weighting::OccurrenceScore => {
            writeln!(w, "{}{}{}\t{}", features, sep, label, count as f64 * score)?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_instance() {
        let mut out = Vec::new();
        write_instance(&mut out, "a\tb", "x", 2, 0.5, Weighting::Duplicate).unwrap();
        write_instance(&mut out, "a\tb", "y", 2, 0.5, Weighting::Occurrence).unwrap();
        write_instance(&mut out, "a\tb", "z", 2, 0.5, Weighting::OccurrenceScore).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a\tb\tx\na\tb\tx\na\tb\ty\t2\na\tb\tz\t1\n"
        );
    }
}
