use std::collections::HashMap;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use ocra::document::DocumentFormat;
use ocra::grammars::{GrammarSet, RawGrammar};
use ocra::themes::RawTheme;
use ocra::{
    BasicScopeAttributesProvider, MergingOptions, MultiThemeLines, TokenizeOptions, Tokenizer,
};

const SAMPLE: &str = r#"import { readFile } from 'fs'
// read a file and print it
const path = "notes.txt"
let content = readFile(path, 'utf-8')
/* TODO: handle errors
   and missing files */
print(content)
let doc = <<END
some text
END
> a quote
> spanning lines
"#;

fn tokenizer(theme: &str) -> Tokenizer {
    let grammar = RawGrammar::load_from_str(
        include_str!("../src/fixtures/grammars/mini-js.json"),
        DocumentFormat::Json,
    )
    .unwrap()
    .compile()
    .unwrap();
    let injector = RawGrammar::load_from_str(
        include_str!("../src/fixtures/grammars/todo.json"),
        DocumentFormat::Json,
    )
    .unwrap()
    .compile()
    .unwrap();
    let grammars = GrammarSet::new(Arc::new(grammar), Vec::new(), vec![Arc::new(injector)]);
    let theme = RawTheme::load_from_str(theme, DocumentFormat::Json)
        .unwrap()
        .compile()
        .unwrap();

    Tokenizer::new(
        Arc::new(grammars),
        Arc::new(theme),
        Arc::new(BasicScopeAttributesProvider::new(1, &HashMap::new())),
    )
}

fn tokenize_benchmark(c: &mut Criterion) {
    let tokenizer = tokenizer(include_str!("../src/fixtures/themes/mini-dark.json"));
    let content = SAMPLE.repeat(100);
    let options = TokenizeOptions::default();

    c.bench_function("tokenize sample", |b| {
        b.iter(|| {
            for line in tokenizer.tokenize(&content, &options).unwrap() {
                std::hint::black_box(line.unwrap());
            }
        })
    });

    let scoped = TokenizeOptions::default().scoped_tokens(true);
    c.bench_function("tokenize sample with scopes", |b| {
        b.iter(|| {
            for line in tokenizer.tokenize(&content, &scoped).unwrap() {
                std::hint::black_box(line.unwrap());
            }
        })
    });
}

fn resume_benchmark(c: &mut Criterion) {
    let tokenizer = tokenizer(include_str!("../src/fixtures/themes/mini-dark.json"));
    let content = SAMPLE.repeat(10);

    c.bench_function("tokenize line by line with states", |b| {
        b.iter(|| {
            let mut options = TokenizeOptions::default();
            for line in content.lines() {
                let mut lines = tokenizer.tokenize(line, &options).unwrap();
                std::hint::black_box(lines.next().unwrap().unwrap());
                // should not be much slower than tokenizing everything at once
                options = TokenizeOptions::default().initial_state(lines.grammar_state());
            }
        })
    });
}

fn multi_theme_benchmark(c: &mut Criterion) {
    let tokenizers = [
        tokenizer(include_str!("../src/fixtures/themes/mini-dark.json")),
        tokenizer(include_str!("../src/fixtures/themes/mini-light.json")),
    ];
    let content = SAMPLE.repeat(100);
    let options = TokenizeOptions::default();
    let merging = MergingOptions::default()
        .merge_whitespaces(true)
        .merge_same_style_tokens(true);

    c.bench_function("tokenize sample with 2 themes", |b| {
        b.iter(|| {
            let lines = MultiThemeLines::new(&content, &tokenizers, &options, merging).unwrap();
            for line in lines {
                std::hint::black_box(line.unwrap());
            }
        })
    });
}

criterion_group!(
    benches,
    tokenize_benchmark,
    resume_benchmark,
    multi_theme_benchmark
);
criterion_main!(benches);
