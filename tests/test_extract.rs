use std::collections::HashMap;

use colibrimt::{
    extract_window, patterns_with_indexes, AlignmentModel, ContextExtractor, Error,
    FeatureConfiguration, FeatureValue, FeatureVector, IndexedCorpus, IndexedPatternModel,
    KeywordOptions, KeywordStore, Pattern, PatternModelOptions, Vocabulary,
};

const SOURCE: &str = "ik zie het huis\nhet huis is groot\nik zie de kat\n";
const TARGET: &str = "i see the house\nthe house is big\ni see the cat\n";

fn scores(pts: f64) -> FeatureVector {
    [0.5, 0.5, pts, 0.5]
        .iter()
        .map(|&v| FeatureValue::Score(v))
        .collect()
}

struct Fixture {
    source_vocab: Vocabulary,
    target_vocab: Vocabulary,
    source_corpus: IndexedCorpus,
    model: AlignmentModel,
    source_model: IndexedPatternModel,
    target_model: IndexedPatternModel,
}

fn fixture() -> Fixture {
    let mut source_vocab = Vocabulary::new();
    let mut target_vocab = Vocabulary::new();
    source_vocab.build_from_text(SOURCE.as_bytes()).unwrap();
    target_vocab.build_from_text(TARGET.as_bytes()).unwrap();
    let source_corpus = IndexedCorpus::from_reader(SOURCE.as_bytes(), &source_vocab).unwrap();
    let target_corpus = IndexedCorpus::from_reader(TARGET.as_bytes(), &target_vocab).unwrap();

    let mut model = AlignmentModel::new();
    let pairs = [
        ("het huis", "the house", 0.8),
        ("het huis", "the home", 0.2),
        ("zie", "see", 0.9),
        ("zie", "i see", 0.4),
    ];
    for (source, target, pts) in pairs {
        model
            .add(
                source_vocab.build_pattern_mut(source),
                target_vocab.build_pattern_mut(target),
                scores(pts),
            )
            .unwrap();
    }
    // never occurs in the corpus
    model
        .add(
            source_vocab.build_pattern_mut("de hond"),
            target_vocab.build_pattern_mut("the dog"),
            scores(0.5),
        )
        .unwrap();

    let mut options = PatternModelOptions::default();
    options.set_min_tokens(1).unwrap();
    options.set_max_length(2).unwrap();
    let source_model =
        IndexedPatternModel::train(&source_corpus, &options, Some(&model.source_model()));
    let target_model =
        IndexedPatternModel::train(&target_corpus, &options, Some(&model.target_model()));
    Fixture {
        source_vocab,
        target_vocab,
        source_corpus,
        model,
        source_model,
        target_model,
    }
}

#[test]
fn test_patterns_with_indexes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fx = fixture();
    let found: HashMap<&Pattern, Vec<_>> =
        patterns_with_indexes(&fx.model, &fx.source_model, &fx.target_model, 2).collect();
    assert_eq!(found.len(), 2);
    assert!(!found.contains_key(&fx.source_vocab.build_pattern("de hond")));

    let huis = &found[&fx.source_vocab.build_pattern("het huis")];
    let positions: Vec<_> = huis
        .iter()
        .map(|o| (o.sentence, o.token, o.target_token))
        .collect();
    assert_eq!(positions, vec![(0, 2, 2), (1, 0, 0)]);
    assert!(huis.iter().all(|o| o.score == 0.8));
    assert!(huis
        .iter()
        .all(|o| o.target == fx.target_vocab.build_pattern("the house")));

    // "see" and "i see" start at different target offsets
    let zie = &found[&fx.source_vocab.build_pattern("zie")];
    let positions: Vec<_> = zie
        .iter()
        .map(|o| (o.sentence, o.token, o.target_token, o.score))
        .collect();
    assert_eq!(
        positions,
        vec![(0, 1, 0, 0.4), (0, 1, 1, 0.9), (2, 1, 0, 0.4), (2, 1, 1, 0.9)]
    );
}

#[test]
fn test_window_two_begin_markers() {
    let fx = fixture();
    let window = extract_window(&fx.source_corpus, 1, 0, 2, 2, true, 1).unwrap();
    assert_eq!(
        window,
        vec![
            Pattern::begin_marker(),
            Pattern::begin_marker(),
            fx.source_vocab.build_pattern("het huis"),
            fx.source_vocab.build_pattern("is"),
        ]
    );
    assert!(matches!(
        extract_window(&fx.source_corpus, 3, 0, 1, 1, true, 1),
        Err(Error::InvalidWindow(_))
    ));
}

#[test]
fn test_context_extractor() {
    let fx = fixture();
    let mut conf = FeatureConfiguration::new();
    conf.add_context_feature("source.cls", 1, true, 1);
    let extractor = ContextExtractor::new(
        &fx.model,
        &fx.source_model,
        &fx.target_model,
        &conf,
        vec![&fx.source_corpus],
    )
    .unwrap();

    let instances: Vec<_> = extractor.extract().collect::<Result<_, _>>().unwrap();
    assert_eq!(instances.len(), 6);

    let huis = fx.source_vocab.build_pattern("het huis");
    let second = instances
        .iter()
        .find(|i| i.occurrence.source == huis && i.occurrence.sentence == 1)
        .unwrap();
    assert_eq!(
        second.context,
        vec![
            FeatureValue::Pattern(Pattern::begin_marker()),
            FeatureValue::Pattern(huis.clone()),
            FeatureValue::Pattern(fx.source_vocab.build_pattern("is")),
        ]
    );
    assert!(second.keywords.is_empty());

    // instances of one source pattern are consecutive
    let sources: Vec<&Pattern> = instances.iter().map(|i| &i.occurrence.source).collect();
    let changes = sources.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(changes, 1);
}

#[test]
fn test_context_extractor_slot_mismatch() {
    let fx = fixture();
    let mut conf = FeatureConfiguration::new();
    conf.add_context_feature("source.cls", 1, true, 1);
    conf.add_context_feature("pos.cls", 1, true, 1);
    let result = ContextExtractor::new(
        &fx.model,
        &fx.source_model,
        &fx.target_model,
        &conf,
        vec![&fx.source_corpus],
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_keywords_mined_and_loaded() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let mut conf = FeatureConfiguration::new();
    conf.add_context_feature("source.cls", 1, false, 1);
    let store = KeywordStore {
        workdir: dir.path(),
        source_vocab: &fx.source_vocab,
        target_vocab: &fx.target_vocab,
    };
    let mut options = KeywordOptions::default();
    options.set_absolute_threshold(1);

    let mut extractor = ContextExtractor::new(
        &fx.model,
        &fx.source_model,
        &fx.target_model,
        &conf,
        vec![&fx.source_corpus],
    )
    .unwrap();
    extractor.mine_keywords(&fx.source_corpus, options, Some(store));
    let mined: Vec<_> = extractor.extract().collect::<Result<_, _>>().unwrap();

    let huis = fx.source_vocab.build_pattern("het huis");
    let path = store.path(&huis);
    assert!(path.ends_with("het%20huis.keywords"));
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert!(written.lines().all(|l| l.contains("\tthe house\t1\t")));

    let huis_flags: Vec<_> = mined
        .iter()
        .filter(|i| i.occurrence.source == huis)
        .map(|i| i.keywords.clone())
        .collect();
    assert!(huis_flags.iter().all(|flags| flags.len() == 4));
    // each sentence holds exactly the two keywords found around it
    assert!(huis_flags
        .iter()
        .all(|flags| flags.iter().filter(|&&f| f).count() == 2));

    extractor.load_keywords(&fx.source_corpus, store);
    let loaded: Vec<_> = extractor.extract().collect::<Result<_, _>>().unwrap();
    assert_eq!(mined, loaded);
}
