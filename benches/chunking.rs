use criterion::{Criterion, criterion_group, criterion_main};
use docuchat::chunking::{ChunkingConfig, TextSplitter, pages_to_text};
use std::hint::black_box;

pub fn criterion_benchmark(c: &mut Criterion) {
    let paragraph = "Retrieval works by comparing the query embedding with every stored chunk. \
                     Chunks overlap so that sentences cut at a boundary still appear whole once.";
    let pages: Vec<String> = (0..40)
        .map(|page| format!("Page {} heading\n\n{}", page, paragraph.repeat(12)))
        .collect();
    let text = pages_to_text(&pages);
    let splitter = TextSplitter::new(ChunkingConfig::default());

    c.bench_function("chunking", |b| {
        b.iter(|| splitter.create_chunks(black_box(&text), "bench.pdf"))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
