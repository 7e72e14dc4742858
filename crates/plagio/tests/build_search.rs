use anyhow::Result;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use plagio::index::{build_index, BuildOptions};
use plagio::SearchEngine;

fn write_corpus(dir: &Path, docs: &[(&str, &str)]) -> Result<PathBuf> {
    let corpus = dir.join("corpus.jsonl");
    let mut f = File::create(&corpus)?;
    for (id, text) in docs {
        writeln!(f, "{}", json!({ "doc_id": id, "text": text }))?;
    }
    Ok(corpus)
}

fn build(dir: &Path, name: &str, docs: &[(&str, &str)]) -> Result<PathBuf> {
    let corpus = write_corpus(dir, docs)?;
    let out = dir.join(name);
    let opts = BuildOptions {
        threads: 1,
        ..BuildOptions::default()
    };
    build_index(&corpus, &out, &opts)?;
    Ok(out)
}

fn load(dir: &Path) -> Result<SearchEngine> {
    let engine = SearchEngine::new();
    engine
        .load(dir)
        .map_err(|e| anyhow::anyhow!("load failed: {}", e))?;
    Ok(engine)
}

const TWELVE_TOKENS: &str = "the quick brown fox jumps over the lazy dog and then some";

#[test]
fn exact_match_scores_full() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx", &[("A", TWELVE_TOKENS)])?;
    let engine = load(&idx)?;

    let hits = engine.search_text(TWELVE_TOKENS, 10, 10);
    assert_eq!(hits.len(), 1);
    let h = &hits[0];
    assert_eq!(h.doc, 0);
    // 12 tokens -> 4 shingles on both sides, all intersecting
    assert_eq!(h.cand_hits, 4);
    assert!((h.j - 1.0).abs() < 1e-12);
    assert!((h.c - 1.0).abs() < 1e-12);
    assert!((h.score - 0.9).abs() < 1e-12);

    let snapshot = engine.snapshot().unwrap();
    assert_eq!(snapshot.doc_ids(), &["A".to_string()]);
    Ok(())
}

#[test]
fn disjoint_texts_do_not_match() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(
        tmp.path(),
        "idx",
        &[("A", "alpha beta gamma delta epsilon zeta eta theta iota kappa")],
    )?;
    let engine = load(&idx)?;

    let hits = engine.search_text("one two three four five six seven eight nine ten", 10, 10);
    assert!(hits.is_empty());
    Ok(())
}

#[test]
fn partial_overlap_needs_a_full_shingle() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let doc_tokens: Vec<String> = (1..=30).map(|i| format!("d{:02}", i)).collect();
    let doc = doc_tokens.join(" ");
    let idx = build(tmp.path(), "idx", &[("A", &doc)])?;
    let engine = load(&idx)?;

    // five consecutive shared tokens: no 9-gram of the query avoids the
    // filler words, so nothing intersects
    let q5 = format!(
        "qa qb qc qd {} qe qf qg",
        doc_tokens[9..14].join(" ")
    );
    assert!(engine.search_text(&q5, 10, 10).is_empty());

    // nine consecutive shared tokens carry exactly one common shingle
    let q9 = format!("qa qb {} qc", doc_tokens[9..18].join(" "));
    let hits = engine.search_text(&q9, 10, 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc, 0);
    assert!(hits[0].score > 0.0);
    Ok(())
}

#[test]
fn decomposed_diacritics_match_plain_ascii() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    // NFD text: base letters plus combining accents, which normalization
    // strips while keeping the ASCII carriers
    let doc = "plagi\u{0300}o u\u{0308}nite\u{0301} cafe\u{0301} detection of near duplicate text systems";
    let idx = build(tmp.path(), "idx", &[("A", doc)])?;
    let engine = load(&idx)?;

    let hits = engine.search_text(
        "plagio unite cafe detection of near duplicate text systems",
        10,
        10,
    );
    assert_eq!(hits.len(), 1);
    assert!((hits[0].score - 0.9).abs() < 1e-12);
    Ok(())
}

#[test]
fn kazakh_case_folding_matches() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let doc = "ҚАЗАҚСТАН РЕСПУБЛИКАСЫНЫҢ ТІЛІ ТУРАЛЫ ЗАҢЫ БАРЛЫҚ АЗАМАТТАРҒА ӨЗ ТІЛІН ҮЙРЕНУГЕ ЖАҒДАЙ ЖАСАЙДЫ";
    let idx = build(tmp.path(), "idx", &[("KZ", doc)])?;
    let engine = load(&idx)?;

    let hits = engine.search_text(&doc.to_lowercase(), 10, 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc, 0);
    Ok(())
}

#[test]
fn short_queries_return_empty() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx", &[("A", TWELVE_TOKENS)])?;
    let engine = load(&idx)?;

    // eight tokens, below the default w_min_query of nine
    let hits = engine.search_text("the quick brown fox jumps over the lazy", 10, 10);
    assert!(hits.is_empty());
    Ok(())
}

#[test]
fn w_min_doc_filters_short_documents() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx", &[("A", TWELVE_TOKENS)])?;
    std::fs::write(
        idx.join("index_config.json"),
        json!({ "w_min_doc": 15 }).to_string(),
    )?;
    let engine = load(&idx)?;

    let hits = engine.search_text(TWELVE_TOKENS, 10, 10);
    assert!(hits.is_empty());
    Ok(())
}

#[test]
fn top_k_is_ordered_and_bounded() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let query = "common tokens shared by every document in this little corpus here";
    // vary the tail so scores differ per doc
    let docs: Vec<(String, String)> = (0..6)
        .map(|i| {
            let tail: Vec<String> = (0..i * 3).map(|j| format!("extra{}x{}", i, j)).collect();
            (format!("doc{}", i), format!("{} {}", query, tail.join(" ")))
        })
        .collect();
    let docs_ref: Vec<(&str, &str)> =
        docs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let idx = build(tmp.path(), "idx", &docs_ref)?;
    let engine = load(&idx)?;

    let hits = engine.search_text(query, 3, 10);
    assert_eq!(hits.len(), 3);
    for w in hits.windows(2) {
        assert!(w[0].score >= w[1].score);
    }
    let snapshot = engine.snapshot().unwrap();
    for h in &hits {
        assert!(h.doc < snapshot.n_docs());
        assert!(h.score <= 0.9 + 1e-12);
    }
    Ok(())
}

#[test]
fn rebuild_is_byte_identical() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let docs = [
        ("A", TWELVE_TOKENS),
        ("B", "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu"),
        ("C", "один два три четыре пять шесть семь восемь девять десять одиннадцать"),
    ];
    let idx1 = build(tmp.path(), "idx1", &docs)?;
    let idx2 = build(tmp.path(), "idx2", &docs)?;

    let bin1 = std::fs::read(idx1.join("index_native.bin"))?;
    let bin2 = std::fs::read(idx2.join("index_native.bin"))?;
    assert_eq!(bin1, bin2);

    let ids1 = std::fs::read(idx1.join("index_native_docids.json"))?;
    let ids2 = std::fs::read(idx2.join("index_native_docids.json"))?;
    assert_eq!(ids1, ids2);
    Ok(())
}

#[test]
fn bad_lines_are_skipped_not_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let corpus = tmp.path().join("corpus.jsonl");
    let mut f = File::create(&corpus)?;
    writeln!(f, "{}", json!({ "doc_id": "A", "text": TWELVE_TOKENS }))?;
    writeln!(f, "this is not json")?;
    writeln!(f, "{}", json!({ "doc_id": "B", "text": "too short" }))?;
    writeln!(f, "{}", json!({ "doc_id": "", "text": TWELVE_TOKENS }))?;
    writeln!(f, "{}", json!({ "doc_id": "C" }))?;
    drop(f);

    let out = tmp.path().join("idx");
    let opts = BuildOptions {
        threads: 1,
        ..BuildOptions::default()
    };
    let report = build_index(&corpus, &out, &opts)?;
    assert_eq!(report.docs_ok, 1);
    assert_eq!(report.docs_bad, 4);

    let engine = load(&out)?;
    assert_eq!(engine.snapshot().unwrap().n_docs(), 1);
    Ok(())
}

#[test]
fn empty_corpus_is_an_error() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let corpus = tmp.path().join("corpus.jsonl");
    std::fs::write(&corpus, "")?;
    let out = tmp.path().join("idx");
    let opts = BuildOptions {
        threads: 1,
        ..BuildOptions::default()
    };
    assert!(build_index(&corpus, &out, &opts).is_err());
    assert!(!out.join("index_native.bin").exists());
    Ok(())
}

#[test]
fn multi_worker_build_matches_single_worker_results() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let docs: Vec<(String, String)> = (0..50)
        .map(|i| {
            let body: Vec<String> = (0..20).map(|j| format!("tok{}w{}", i % 7, j)).collect();
            (format!("doc{}", i), body.join(" "))
        })
        .collect();
    let docs_ref: Vec<(&str, &str)> =
        docs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

    let corpus = write_corpus(tmp.path(), &docs_ref)?;
    let out1 = tmp.path().join("idx1");
    let out4 = tmp.path().join("idx4");
    build_index(
        &corpus,
        &out1,
        &BuildOptions {
            threads: 1,
            ..BuildOptions::default()
        },
    )?;
    build_index(
        &corpus,
        &out4,
        &BuildOptions {
            threads: 4,
            ..BuildOptions::default()
        },
    )?;

    // doc-id assignment may differ across worker counts, but the same
    // query must surface the same external ids with the same scores
    let e1 = load(&out1)?;
    let e4 = load(&out4)?;
    let s1 = e1.snapshot().unwrap();
    let s4 = e4.snapshot().unwrap();

    let query: Vec<String> = (0..20).map(|j| format!("tok3w{}", j)).collect();
    let query = query.join(" ");
    let mut r1: Vec<(String, String)> = e1
        .search_text(&query, 10, 10)
        .iter()
        .map(|h| (s1.doc_ids()[h.doc as usize].clone(), format!("{:.12}", h.score)))
        .collect();
    let mut r4: Vec<(String, String)> = e4
        .search_text(&query, 10, 10)
        .iter()
        .map(|h| (s4.doc_ids()[h.doc as usize].clone(), format!("{:.12}", h.score)))
        .collect();
    r1.sort();
    r4.sort();
    assert_eq!(r1, r4);
    Ok(())
}
