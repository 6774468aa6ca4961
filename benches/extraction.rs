//! Performance benchmarks for per-turn extraction and scoring

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hearth::intelligence::{
    FamilyExtractor, RuleBasedStrategy, SymptomCategory, SymptomExtractor, TokenCounter,
    TokenEncoding,
};
use hearth::types::SymptomMap;

const MESSAGE: &str = "My son Sam is 9 and in 3rd grade at Lincoln Elementary. \
                       He has ADHD and can't sit still during homework. \
                       His sister Ava is 6, she worries about everything and is scared of the dark. \
                       My husband Chris handles bedtime.";

fn bench_family_extraction(c: &mut Criterion) {
    let extractor = FamilyExtractor::default();
    let empty = BTreeSet::new();
    let known: BTreeSet<String> = ["Sam", "Ava", "Chris"].iter().map(|s| s.to_string()).collect();

    let mut group = c.benchmark_group("family_extraction");
    group.throughput(Throughput::Bytes(MESSAGE.len() as u64));

    group.bench_function("cold", |b| b.iter(|| extractor.extract(black_box(MESSAGE), &empty)));
    group.bench_function("known_names", |b| {
        b.iter(|| extractor.extract(black_box(MESSAGE), &known))
    });

    group.finish();
}

fn bench_symptom_extraction(c: &mut Criterion) {
    let extractor = SymptomExtractor::new();

    let mut group = c.benchmark_group("symptom_extraction");
    group.throughput(Throughput::Bytes(MESSAGE.len() as u64));

    group.bench_function("named_person", |b| {
        b.iter(|| extractor.extract(black_box(MESSAGE), "Sam"))
    });

    group.finish();
}

fn bench_rule_scoring(c: &mut Criterion) {
    let strategy = RuleBasedStrategy::default();
    let mut symptoms = SymptomMap::new();
    for category in SymptomCategory::SCORED {
        for (i, key) in category.keys().enumerate() {
            symptoms.insert(key.to_string(), i % 2 == 0);
        }
    }

    c.bench_function("rule_scoring_full_map", |b| {
        b.iter(|| strategy.evaluate(black_box(&symptoms)))
    });
}

fn bench_token_counting(c: &mut Criterion) {
    let counter = match TokenCounter::new(TokenEncoding::Cl100kBase) {
        Ok(counter) => counter,
        Err(_) => return,
    };
    let prompt = MESSAGE.repeat(20);

    let mut group = c.benchmark_group("token_counting");
    group.throughput(Throughput::Bytes(prompt.len() as u64));
    group.bench_function("cl100k", |b| b.iter(|| counter.count(black_box(&prompt))));
    group.finish();
}

criterion_group!(
    benches,
    bench_family_extraction,
    bench_symptom_extraction,
    bench_rule_scoring,
    bench_token_counting
);

criterion_main!(benches);
