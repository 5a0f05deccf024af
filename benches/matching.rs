use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use escape_room_rs::{Normalizer, is_match, partial_ratio};
use std::sync::Once;

fn ensure_loaded() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        // Force the lexicon so the benches below measure steady-state preprocessing.
        let _ = Normalizer::english().preprocess("warm up");
    });
}

fn bench_preprocess(c: &mut Criterion) {
    ensure_loaded();
    let normalizer = Normalizer::english();
    const INPUTS: &[&str] = &[
        "mirror",
        "I think it's the burning candles",
        "The answer is definitely a reflection in the stone mirror!",
    ];
    for &input in INPUTS {
        c.bench_with_input(
            BenchmarkId::new("preprocess", input.len()),
            &input,
            |b, &input| {
                b.iter(|| black_box(normalizer.preprocess(input)));
            },
        );
    }
}

fn bench_is_match(c: &mut Criterion) {
    ensure_loaded();
    const CASES: &[(&str, &str, &str)] = &[
        ("exact", "mirror", "mirror"),
        ("subset", "silver key", "a key made of silver"),
        ("fuzzy", "inscription", "inscriptoin"),
        ("miss", "fire", "a very long wrong answer about water and stones"),
    ];
    for &(label, correct, candidate) in CASES {
        c.bench_with_input(
            BenchmarkId::new("is_match", label),
            &(correct, candidate),
            |b, &(correct, candidate)| {
                b.iter(|| black_box(is_match(correct, candidate)));
            },
        );
    }
}

fn bench_element_probe(c: &mut Criterion) {
    const ELEMENTS: &[&str] = &["glowing_inscription", "silver_key", "stone_mirror"];
    c.bench_function("element_probe::partial_ratio", |b| {
        b.iter(|| {
            let best = ELEMENTS
                .iter()
                .map(|element| partial_ratio("let me look at the stone mirror", element))
                .max();
            black_box(best);
        });
    });
}

criterion_group!(
    benches,
    bench_preprocess,
    bench_is_match,
    bench_element_probe
);
criterion_main!(benches);
