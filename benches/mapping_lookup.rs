//! Benchmarks for first-match table lookup

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridmap_rs::strategy::{AccountIndicatorStrategy, GroupNameStrategy};
use gridmap_rs::{DistinguishedName, Fqan, OrderedMappingTable};
use std::fmt::Write as _;
use std::path::Path;

fn build_table(entries: usize) -> OrderedMappingTable {
    let mut text = String::new();
    for i in 0..entries {
        if i % 2 == 0 {
            writeln!(text, "\"/vo{}/group{}\" .pool{}", i, i, i).unwrap();
        } else {
            writeln!(text, "\"/DC=org/DC=example/CN=user{}\" account{}", i, i).unwrap();
        }
    }
    text.push_str("\"/switch/*/Role=*\" .testa\n");
    OrderedMappingTable::parse_str(&text, Path::new("bench.map")).unwrap()
}

fn bench_account_indicator(c: &mut Criterion) {
    let mut group = c.benchmark_group("account_indicator");
    let dn = DistinguishedName::parse("/DC=org/DC=example/CN=usera").unwrap();
    let fqan = Fqan::parse("/switch/group1/Role=admin").unwrap();
    let strategy = AccountIndicatorStrategy::default();

    for size in [10, 100, 1000] {
        let table = build_table(size);
        group.bench_with_input(BenchmarkId::new("last_entry", size), &table, |b, table| {
            b.iter(|| {
                strategy
                    .account_indicator(black_box(table), black_box(&dn), Some(black_box(&fqan)))
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_secondary_groups(c: &mut Criterion) {
    let table = build_table(200);
    let fqans: Vec<Fqan> = (0..20)
        .map(|i| Fqan::parse(&format!("/vo{}/group{}", i * 2, i * 2)).unwrap())
        .collect();

    c.bench_function("group_indicators_20_of_200", |b| {
        b.iter(|| GroupNameStrategy.group_indicators(black_box(&table), black_box(&fqans)));
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_dn_slash", |b| {
        b.iter(|| {
            DistinguishedName::parse(black_box("/DC=org/DC=example/OU=People/CN=User A 1234"))
                .unwrap()
        });
    });
    c.bench_function("parse_fqan", |b| {
        b.iter(|| Fqan::parse(black_box("/atlas/production/Role=admin/Capability=NULL")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_account_indicator,
    bench_secondary_groups,
    bench_parse
);
criterion_main!(benches);
