//! Moses decoder configuration and invocation

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{open_existing, Error, Result};

/// An old-style `moses.ini` for a single phrase table and language model
#[derive(Debug, Clone, PartialEq)]
pub struct MosesConfig {
    phrase_table: PathBuf,
    score_columns: usize,
    lm: PathBuf,
    lm_order: usize,
    distortion_weight: f64,
    lm_weight: f64,
    translation_weights: Option<Vec<f64>>,
    word_penalty: f64,
    distortion_limit: usize,
    ttable_limit: usize,
}

impl MosesConfig {
    pub fn new<P: Into<PathBuf>, L: Into<PathBuf>>(
        phrase_table: P,
        score_columns: usize,
        lm: L,
        lm_order: usize,
    ) -> Result<Self> {
        if score_columns == 0 {
            return Err(Error::invalid_input("phrase table needs at least one score column"));
        }
        if lm_order == 0 {
            return Err(Error::invalid_input("language model order must be at least 1"));
        }
        Ok(Self {
            phrase_table: phrase_table.into(),
            score_columns,
            lm: lm.into(),
            lm_order,
            distortion_weight: 0.6,
            lm_weight: 0.5,
            translation_weights: None,
            word_penalty: -1.0,
            distortion_limit: 6,
            ttable_limit: 20,
        })
    }

    pub fn set_distortion_weight(&mut self, weight: f64) {
        self.distortion_weight = weight;
    }

    pub fn set_lm_weight(&mut self, weight: f64) {
        self.lm_weight = weight;
    }

    pub fn set_word_penalty(&mut self, weight: f64) {
        self.word_penalty = weight;
    }

    pub fn set_distortion_limit(&mut self, limit: usize) {
        self.distortion_limit = limit;
    }

    /// One weight per score column; defaults to 0.2 each
    pub fn set_translation_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.score_columns {
            return Err(Error::invalid_input(format!(
                "{} translation weights given for {} score columns",
                weights.len(),
                self.score_columns
            )));
        }
        self.translation_weights = Some(weights);
        Ok(())
    }

    pub fn translation_weights(&self) -> Vec<f64> {
        self.translation_weights
            .clone()
            .unwrap_or_else(|| vec![0.2; self.score_columns])
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

impl fmt::Display for MosesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#########################")?;
        writeln!(f, "### MOSES CONFIG FILE ###")?;
        writeln!(f, "#########################")?;
        writeln!(f)?;
        writeln!(f, "[input-factors]\n0\n")?;
        writeln!(f, "[mapping]\n0 T 0\n")?;
        writeln!(
            f,
            "[ttable-file]\n0 0 0 {} {}\n",
            self.score_columns,
            self.phrase_table.display()
        )?;
        writeln!(f, "[lmodel-file]\n0 0 {} {}\n", self.lm_order, self.lm.display())?;
        writeln!(f, "[ttable-limit]\n{}\n", self.ttable_limit)?;
        writeln!(f, "[weight-d]\n{}\n", self.distortion_weight)?;
        writeln!(f, "[weight-l]\n{}\n", self.lm_weight)?;
        writeln!(f, "[weight-t]")?;
        for weight in self.translation_weights() {
            writeln!(f, "{}", weight)?;
        }
        writeln!(f)?;
        writeln!(f, "[weight-w]\n{}\n", self.word_penalty)?;
        writeln!(f, "[distortion-limit]\n{}", self.distortion_limit)
    }
}

/// Run the decoder on `input`, writing its translations to `output`
pub fn run_decoder<B, I, T, O>(binary: B, ini: I, input: T, output: O) -> Result<()>
where
    B: AsRef<Path>,
    I: AsRef<Path>,
    T: AsRef<Path>,
    O: AsRef<Path>,
{
    let binary = binary.as_ref();
    let stdin = open_existing(input.as_ref())?;
    let stdout = File::create(output.as_ref())?;
    log::info!("Running {} -f {}", binary.display(), ini.as_ref().display());
    let status = Command::new(binary)
        .arg("-f")
        .arg(ini.as_ref())
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .status()
        .map_err(|e| Error::Process(format!("failed to start {}: {}", binary.display(), e)))?;
    if !status.success() {
        return Err(Error::Process(format!(
            "{} exited with {}",
            binary.display(),
            status
        )));
    }
    Ok(())
}
