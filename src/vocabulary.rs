use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{open_existing, Error, Result};
use crate::pattern::{
    ClassId, Pattern, BEGIN_CLASS, END_CLASS, FIRST_WORD_CLASS, SKIP_CLASS, UNKNOWN_CLASS,
};

/// A bidirectional mapping between words and class ids
///
/// Acts as both class encoder and class decoder. The reserved classes
/// (unknown, skip, begin and end markers) are always present.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Map from word to class
    word_to_class: HashMap<String, ClassId>,
    /// Map from class to word, indexed by class id
    class_to_word: Vec<String>,
    /// Class file this vocabulary was loaded from or last saved to
    filename: Option<PathBuf>,
}

impl Vocabulary {
    /// Create a vocabulary holding only the reserved classes
    pub fn new() -> Self {
        let mut class_to_word = vec![String::new(); FIRST_WORD_CLASS as usize];
        class_to_word[UNKNOWN_CLASS as usize] = "{?}".to_string();
        class_to_word[SKIP_CLASS as usize] = "{*}".to_string();
        class_to_word[BEGIN_CLASS as usize] = "<s>".to_string();
        class_to_word[END_CLASS as usize] = "</s>".to_string();
        Self {
            word_to_class: HashMap::new(),
            class_to_word,
            filename: None,
        }
    }

    /// Load a class file with one `class<TAB>word` entry per line
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(open_existing(path)?);
        let mut vocab = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (class, word) = line.split_once('\t').ok_or_else(|| {
                Error::invalid_input(format!(
                    "{}:{}: expected class<TAB>word",
                    path.display(),
                    lineno + 1
                ))
            })?;
            let class: ClassId = class.trim().parse().map_err(|_| {
                Error::invalid_input(format!(
                    "{}:{}: invalid class id {:?}",
                    path.display(),
                    lineno + 1,
                    class
                ))
            })?;
            if class < FIRST_WORD_CLASS {
                continue;
            }
            vocab.insert_with_class(word, class);
        }
        vocab.filename = Some(path.to_path_buf());
        Ok(vocab)
    }

    /// Write the class file and remember its location
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        for (word, class) in self.iter() {
            writeln!(writer, "{}\t{}", class, word)?;
        }
        writer.flush()?;
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// Add every whitespace-separated token of a tokenised text
    pub fn build_from_text<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            for word in line.split_whitespace() {
                self.get_or_insert(word);
            }
        }
        Ok(())
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn set_filename<P: Into<PathBuf>>(&mut self, path: P) {
        self.filename = Some(path.into());
    }

    /// Number of ordinary words
    pub fn len(&self) -> usize {
        self.word_to_class.len()
    }

    /// Returns `true` if the vocabulary contains no ordinary words
    pub fn is_empty(&self) -> bool {
        self.word_to_class.is_empty()
    }

    /// Get or create the class of a word
    pub fn get_or_insert(&mut self, word: &str) -> ClassId {
        if let Some(&class) = self.word_to_class.get(word) {
            class
        } else {
            let class = self.class_to_word.len() as ClassId;
            self.word_to_class.insert(word.to_string(), class);
            self.class_to_word.push(word.to_string());
            class
        }
    }

    fn insert_with_class(&mut self, word: &str, class: ClassId) {
        let index = class as usize;
        if self.class_to_word.len() <= index {
            self.class_to_word.resize(index + 1, String::new());
        }
        self.class_to_word[index] = word.to_string();
        self.word_to_class.insert(word.to_string(), class);
    }

    pub fn class(&self, word: &str) -> Option<ClassId> {
        self.word_to_class.get(word).copied()
    }

    pub fn word(&self, class: ClassId) -> Option<&str> {
        self.class_to_word
            .get(class as usize)
            .map(String::as_str)
            .filter(|w| !w.is_empty())
    }

    /// Encode a phrase, mapping unseen words to the unknown class
    ///
    /// The `{*}` token is read as a gap.
    pub fn build_pattern(&self, text: &str) -> Pattern {
        let classes: Vec<ClassId> = text
            .split_whitespace()
            .map(|w| match w {
                "{*}" => SKIP_CLASS,
                _ => self.class(w).unwrap_or(UNKNOWN_CLASS),
            })
            .collect();
        Pattern::new(classes)
    }

    /// Encode a phrase, adding unseen words to the vocabulary
    pub fn build_pattern_mut(&mut self, text: &str) -> Pattern {
        let classes: Vec<ClassId> = text
            .split_whitespace()
            .map(|w| match w {
                "{*}" => SKIP_CLASS,
                _ => self.get_or_insert(w),
            })
            .collect();
        Pattern::new(classes)
    }

    /// Decode a pattern into a space-joined string
    pub fn render(&self, pattern: &Pattern) -> String {
        let mut out = String::new();
        for (i, &class) in pattern.classes().iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(self.word(class).unwrap_or("{?}"));
        }
        out
    }

    /// Render a pattern as a percent-escaped string usable as a file name
    pub fn render_escaped(&self, pattern: &Pattern) -> String {
        escape_filename(&self.render(pattern))
    }

    /// Iterate over all (word, class) pairs of ordinary words in class order
    pub fn iter(&self) -> impl Iterator<Item = (&str, ClassId)> + '_ {
        self.class_to_word
            .iter()
            .enumerate()
            .skip(FIRST_WORD_CLASS as usize)
            .filter(|(_, w)| !w.is_empty())
            .map(|(class, w)| (w.as_str(), class as ClassId))
    }
}

/// Percent-escape everything but ASCII alphanumerics and `-_.~`
pub fn escape_filename(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_basic() {
        let mut vocab = Vocabulary::new();
        assert_eq!(vocab.len(), 0);

        let c1 = vocab.get_or_insert("huis");
        assert_eq!(c1, FIRST_WORD_CLASS);
        let c2 = vocab.get_or_insert("paleis");
        assert_eq!(c2, FIRST_WORD_CLASS + 1);

        // Getting the same word should return the same class
        assert_eq!(vocab.get_or_insert("huis"), c1);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_build_and_render() {
        let mut vocab = Vocabulary::new();
        let p = vocab.build_pattern_mut("het grote huis");
        assert_eq!(p.len(), 3);
        assert_eq!(vocab.render(&p), "het grote huis");

        let unknown = vocab.build_pattern("het kleine huis");
        assert_eq!(unknown.classes()[1], UNKNOWN_CLASS);
        assert_eq!(vocab.render(&unknown), "het {?} huis");

        let skip = vocab.build_pattern("het {*} huis");
        assert!(skip.is_skipgram());
        assert_eq!(vocab.render(&skip), "het {*} huis");
    }

    #[test]
    fn test_vocabulary_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nl.cls");
        let mut vocab = Vocabulary::new();
        vocab.build_pattern_mut("de grote oever");
        vocab.save(&path).unwrap();

        let loaded = Vocabulary::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.class("oever"), vocab.class("oever"));
        assert_eq!(loaded.filename(), Some(path.as_path()));
        let items: Vec<_> = loaded.iter().collect();
        assert_eq!(items[0], ("de", FIRST_WORD_CLASS));
    }

    #[test]
    fn test_escape_filename() {
        assert_eq!(escape_filename("het huis"), "het%20huis");
        assert_eq!(escape_filename("a/b"), "a%2Fb");
        assert_eq!(escape_filename("café"), "caf%C3%A9");
        assert_eq!(escape_filename("{*}"), "%7B%2A%7D");
    }

    #[test]
    fn test_vocabulary_load_missing() {
        let err = Vocabulary::load("/nonexistent/vocab.cls").unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }
}
