use std::fmt::Write;
use std::io::Cursor;

use colibrimt::{AlignmentModel, PhraseTableOptions, Vocabulary};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn phrase_table(sources: usize, options_per_source: usize) -> String {
    let mut table = String::new();
    for s in 0..sources {
        for t in 0..options_per_source {
            let pts = 1.0 / (t + 1) as f64;
            writeln!(
                table,
                "bron{} woord{} ||| target{} word{} ||| 0.5 0.25 {} 0.125 2.718 ||| 0-0 1-1",
                s,
                s % 97,
                t,
                s % 13,
                pts
            )
            .unwrap();
        }
    }
    table
}

fn criterion_benchmark(c: &mut Criterion) {
    let table = phrase_table(2000, 8);
    let mut group = c.benchmark_group("alignmodel");

    group.bench_function("load_phrase_table", |b| {
        b.iter(|| {
            let mut source_vocab = Vocabulary::new();
            let mut target_vocab = Vocabulary::new();
            let mut model = AlignmentModel::new();
            model
                .load_moses_phrase_table(
                    Cursor::new(black_box(table.as_bytes())),
                    &mut source_vocab,
                    &mut target_vocab,
                    &PhraseTableOptions::default(),
                    None,
                    None,
                    None,
                )
                .unwrap();
            model
        })
    });

    group.bench_function("load_phrase_table_divergence", |b| {
        let mut options = PhraseTableOptions::default();
        options.set_divergence_threshold(0.3).unwrap();
        b.iter(|| {
            let mut source_vocab = Vocabulary::new();
            let mut target_vocab = Vocabulary::new();
            let mut model = AlignmentModel::new();
            model
                .load_moses_phrase_table(
                    Cursor::new(black_box(table.as_bytes())),
                    &mut source_vocab,
                    &mut target_vocab,
                    &options,
                    None,
                    None,
                    None,
                )
                .unwrap();
            model
        })
    });

    let mut source_vocab = Vocabulary::new();
    let mut target_vocab = Vocabulary::new();
    let mut model = AlignmentModel::new();
    model
        .load_moses_phrase_table(
            Cursor::new(table.as_bytes()),
            &mut source_vocab,
            &mut target_vocab,
            &PhraseTableOptions::default(),
            None,
            None,
            None,
        )
        .unwrap();
    group.bench_function("normalize", |b| {
        b.iter(|| {
            let mut model = model.clone();
            model.normalize(black_box("s-t-")).unwrap();
            model
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
