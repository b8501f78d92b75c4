//! Gapped generalizations of aligned phrase pairs

use std::collections::BTreeMap;

use crate::alignmodel::AlignmentModel;
use crate::corpus::IndexedCorpus;
use crate::error::{Error, Result};
use crate::feature::{FeatureValue, FeatureVector};
use crate::pattern::{internal_gap_masks, Pattern, MAX_SKIPGRAM_LENGTH};
use crate::patternmodel::{IndexedPatternModel, PatternModelInterface, PatternModelOptions};

/// Options for [`abstract_skipgrams`]
#[derive(Debug, Clone)]
pub struct SkipgramOptions {
    model: PatternModelOptions,
    lexical_fields: Vec<usize>,
    pst_field: usize,
    pts_field: usize,
}

impl Default for SkipgramOptions {
    fn default() -> Self {
        let mut model = PatternModelOptions::default();
        model.set_do_skipgrams(true);
        Self {
            model,
            lexical_fields: vec![1, 3],
            pst_field: 0,
            pts_field: 2,
        }
    }
}

impl SkipgramOptions {
    pub fn min_tokens(&self) -> usize {
        self.model.min_tokens()
    }

    pub fn set_min_tokens(&mut self, min_tokens: usize) -> Result<()> {
        self.model.set_min_tokens(min_tokens)
    }

    pub fn min_skip_types(&self) -> usize {
        self.model.min_skip_types()
    }

    pub fn set_min_skip_types(&mut self, min_skip_types: usize) -> Result<()> {
        self.model.set_min_skip_types(min_skip_types)
    }

    pub fn max_length(&self) -> usize {
        self.model.max_length()
    }

    /// At most [`MAX_SKIPGRAM_LENGTH`]
    pub fn set_max_length(&mut self, max_length: usize) -> Result<()> {
        if max_length > MAX_SKIPGRAM_LENGTH {
            return Err(Error::invalid_input(format!(
                "max_length must be at most {}",
                MAX_SKIPGRAM_LENGTH
            )));
        }
        self.model.set_max_length(max_length)
    }

    /// Score slots holding lexical weights; abstractions get the neutral 1.0
    pub fn lexical_fields(&self) -> &[usize] {
        &self.lexical_fields
    }

    pub fn set_lexical_fields(&mut self, fields: Vec<usize>) -> Result<()> {
        if fields.contains(&self.pst_field) || fields.contains(&self.pts_field) {
            return Err(Error::invalid_input(
                "lexical fields must not overlap the translation probability fields",
            ));
        }
        self.lexical_fields = fields;
        Ok(())
    }

    pub fn set_probability_fields(&mut self, pst_field: usize, pts_field: usize) -> Result<()> {
        if pst_field == pts_field {
            return Err(Error::invalid_input("p(s|t) and p(t|s) fields must differ"));
        }
        self.pst_field = pst_field;
        self.pts_field = pts_field;
        Ok(())
    }
}

/// Templates mined from `model` that a concrete phrase instantiates
///
/// Phrases longer than `max_length` have no templates.
fn templates_of<'a>(
    concrete: &Pattern,
    model: &'a IndexedPatternModel,
    max_length: usize,
) -> impl Iterator<Item = Pattern> + 'a {
    let concrete = concrete.clone();
    let masks = if concrete.len() > max_length {
        Vec::new()
    } else {
        internal_gap_masks(concrete.len())
    };
    masks
        .into_iter()
        .map(move |mask| concrete.with_gaps(&mask))
        .filter(move |template| model.has(template))
}

fn gaps_agree(source: &Pattern, target: &Pattern, alignment: &[(u32, u32)]) -> bool {
    alignment
        .iter()
        .all(|&(i, j)| source.is_gap(i as usize) == target.is_gap(j as usize))
}

/// Add skip-gram pairs generalizing the concrete pairs of `model`
///
/// Templates are mined over the source and target phrases of the model. A
/// combination of a source and target template is kept only when every word
/// alignment links gap to gap or word to word. The translation probabilities
/// of all concrete pairs behind an abstraction are summed and the model is
/// renormalized afterwards. Returns the number of pairs inserted.
pub fn abstract_skipgrams(model: &mut AlignmentModel, options: &SkipgramOptions) -> Result<usize> {
    let source_corpus = IndexedCorpus::from_sentences(model.source_patterns().cloned());
    let target_corpus = IndexedCorpus::from_sentences(model.target_patterns(None).cloned());
    let source_model = IndexedPatternModel::train(&source_corpus, &options.model, None);
    let target_model = IndexedPatternModel::train(&target_corpus, &options.model, None);
    log::info!(
        "Mined {} source and {} target skipgrams",
        source_model.skipgrams().count(),
        target_model.skipgrams().count()
    );

    let mut abstractions: BTreeMap<(Pattern, Pattern), FeatureVector> = BTreeMap::new();
    for (source, target, vector) in model.iter() {
        let Some(alignment) = vector.iter().find_map(FeatureValue::as_alignment) else {
            continue;
        };
        if alignment.is_empty() {
            continue;
        }
        let target_templates: Vec<Pattern> =
            templates_of(target, &target_model, options.max_length()).collect();
        if target_templates.is_empty() {
            continue;
        }
        for source_template in templates_of(source, &source_model, options.max_length()) {
            for target_template in &target_templates {
                if !gaps_agree(&source_template, target_template, alignment) {
                    continue;
                }
                let key = (source_template.clone(), target_template.clone());
                match abstractions.get_mut(&key) {
                    Some(accumulated) => {
                        accumulate(accumulated, vector, options)?;
                    }
                    None => {
                        abstractions.insert(key, placeholder(vector, options)?);
                    }
                }
            }
        }
    }

    let mut inserted = 0;
    for ((source, target), vector) in abstractions {
        if !model.has_pair(&source, &target) {
            inserted += 1;
        }
        model.add(source, target, vector)?;
    }
    log::info!("Inserted {} skipgram pairs", inserted);

    let width = options.pst_field.max(options.pts_field) + 1;
    let directive: String = (0..width)
        .map(|i| match i {
            i if i == options.pst_field => 's',
            i if i == options.pts_field => 't',
            _ => '-',
        })
        .collect();
    model.normalize(&directive)?;
    Ok(inserted)
}

fn placeholder(concrete: &[FeatureValue], options: &SkipgramOptions) -> Result<FeatureVector> {
    let mut vector = Vec::with_capacity(concrete.len());
    for (i, value) in concrete.iter().enumerate() {
        let abstracted = match value {
            FeatureValue::Alignment(_) => value.clone(),
            _ if options.lexical_fields.contains(&i) => FeatureValue::Score(1.0),
            _ if i == options.pst_field || i == options.pts_field => {
                FeatureValue::Score(value.as_f64().ok_or_else(|| {
                    Error::schema(format!("probability slot {} is not numeric", i))
                })?)
            }
            FeatureValue::Score(_) | FeatureValue::Int(_) => FeatureValue::Score(0.0),
            _ => value.clone(),
        };
        vector.push(abstracted);
    }
    Ok(vector)
}

fn accumulate(
    accumulated: &mut FeatureVector,
    concrete: &[FeatureValue],
    options: &SkipgramOptions,
) -> Result<()> {
    for field in [options.pst_field, options.pts_field] {
        let (Some(total), Some(value)) = (
            accumulated.get(field).and_then(FeatureValue::as_f64),
            concrete.get(field).and_then(FeatureValue::as_f64),
        ) else {
            return Err(Error::schema(format!("probability slot {} is not numeric", field)));
        };
        accumulated[field] = FeatureValue::Score(total + value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::SKIP_CLASS;

    #[test]
    fn test_gaps_agree() {
        let source = Pattern::new(vec![5, SKIP_CLASS, 6]);
        let target = Pattern::new(vec![7, SKIP_CLASS, 8]);
        assert!(gaps_agree(&source, &target, &[(0, 0), (1, 1), (2, 2)]));
        assert!(!gaps_agree(&source, &target, &[(0, 1), (1, 0), (2, 2)]));
    }

    #[test]
    fn test_placeholder() {
        let concrete = vec![
            FeatureValue::Score(0.5),
            FeatureValue::Score(0.4),
            FeatureValue::Score(0.3),
            FeatureValue::Score(0.2),
            FeatureValue::Score(2.718),
            FeatureValue::Alignment(vec![(0, 0)]),
        ];
        let options = SkipgramOptions::default();
        let mut vector = placeholder(&concrete, &options).unwrap();
        assert_eq!(
            vector,
            vec![
                FeatureValue::Score(0.5),
                FeatureValue::Score(1.0),
                FeatureValue::Score(0.3),
                FeatureValue::Score(1.0),
                FeatureValue::Score(0.0),
                FeatureValue::Alignment(vec![(0, 0)]),
            ]
        );
        accumulate(&mut vector, &concrete, &options).unwrap();
        assert_eq!(vector[0], FeatureValue::Score(1.0));
        assert_eq!(vector[2], FeatureValue::Score(0.6));
    }

    #[test]
    fn test_options_validation() {
        let mut options = SkipgramOptions::default();
        assert!(options.set_lexical_fields(vec![0]).is_err());
        assert!(options.set_probability_fields(1, 1).is_err());
        assert!(options.set_max_length(0).is_err());
        assert!(options.set_max_length(MAX_SKIPGRAM_LENGTH + 1).is_err());
        assert!(options.set_max_length(MAX_SKIPGRAM_LENGTH).is_ok());
    }
}
