use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use zoekt_index::{Cancellation, IndexBuilder, IndexData, Repository, SearchOptions, Q};

fn synthetic_builder(files: usize, lines: usize) -> IndexBuilder {
    let mut b = IndexBuilder::new(Some(Repository::new(1, "bench"))).unwrap();
    for i in 0..files {
        let mut s = String::new();
        for j in 0..lines {
            s.push_str(&format!("// file {i} line {j}\n"));
            s.push_str(&format!("fn sym_{i:04}_{j}() {{ let total = {j} * 42; }}\n"));
        }
        b.add_file(&format!("src/file_{i:04}.rs"), s.as_bytes()).unwrap();
    }
    b
}

fn build_bench(c: &mut Criterion) {
    c.bench_function("build_shard_200_files", |b| {
        b.iter(|| {
            let ib = synthetic_builder(200, 50);
            black_box(ib.to_bytes().unwrap())
        })
    });
}

fn search_bench(c: &mut Criterion) {
    let bytes = synthetic_builder(1000, 50).to_bytes().unwrap();
    let d = IndexData::from_bytes("bench", bytes).unwrap();
    let opts = SearchOptions::default();

    c.bench_function("substring_rare", |b| {
        b.iter(|| {
            let res = d
                .search(&Q::content("sym_0999_49"), &opts, &Cancellation::new())
                .unwrap();
            black_box(res.files.len())
        })
    });
    c.bench_function("substring_common", |b| {
        b.iter(|| {
            let res = d.search(&Q::content("total"), &opts, &Cancellation::new()).unwrap();
            black_box(res.stats.match_count)
        })
    });
    c.bench_function("regexp_and", |b| {
        let q = Q::and(vec![Q::regexp(r"sym_00\d\d_1"), Q::file_name("file_00")]);
        b.iter(|| {
            let res = d.search(&q, &opts, &Cancellation::new()).unwrap();
            black_box(res.files.len())
        })
    });
}

criterion_group!(benches, build_bench, search_bench);
criterion_main!(benches);
