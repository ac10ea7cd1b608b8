use criterion::{black_box, criterion_group, criterion_main, Criterion};
use myanalyst::highlight::{highlight_terms, GlossaryEntry};
use myanalyst::report::render_markdown;
use myanalyst::sections::annotate_sections;

fn bench_report_pipeline(c: &mut Criterion) {
    let markdown = sample_report(40);
    let glossary = sample_glossary();
    let annotated = annotate_sections(&markdown);
    let html = render_markdown(&annotated);

    c.bench_function("annotate_sections", |b| {
        b.iter(|| annotate_sections(black_box(&markdown)))
    });

    c.bench_function("annotate_sections_again", |b| {
        b.iter(|| annotate_sections(black_box(&annotated)))
    });

    c.bench_function("highlight_terms", |b| {
        b.iter(|| highlight_terms(black_box(&html), black_box(&glossary)))
    });

    c.bench_function("highlight_terms_no_glossary", |b| {
        b.iter(|| highlight_terms(black_box(&html), black_box(&[] as &[GlossaryEntry])))
    });
}

fn sample_glossary() -> Vec<GlossaryEntry> {
    [
        "PER", "PBR", "EPS", "ROE", "EBITDA", "EV/EBITDA", "영업이익", "영업이익률", "순이익률",
        "부채비율", "배당수익률", "시가총액", "R&D", "FCF",
    ]
    .into_iter()
    .map(|term| GlossaryEntry::new(term, format!("{term} 설명")))
    .collect()
}

fn sample_report(sections: usize) -> String {
    let mut report = String::new();
    for main in 1..=sections {
        report.push_str(&format!("{main}. 섹션 {main}\n\n"));
        for sub in 1..=3 {
            report.push_str(&format!("{main}.{sub} 세부 항목\n\n"));
            report.push_str(
                "영업이익률이 개선되며 PER 과 PBR 이 하락했다. EV/EBITDA 는 \
                 업종 평균 대비 낮고, R&D 투자 확대로 FCF 가 줄었다. \
                 [시가총액](https://example.com/cap) 기준 순위는 유지.\n\n",
            );
            report.push_str("| 지표 | 값 |\n|---|---|\n| ROE | 12% |\n| EPS | 3,200 |\n\n");
        }
    }
    report
}

criterion_group!(benches, bench_report_pipeline);
criterion_main!(benches);
