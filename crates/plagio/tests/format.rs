use anyhow::Result;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use plagio::engine::{LoadError, LoadedIndex};
use plagio::index::{build_index, BuildOptions};
use plagio::text::{self, SHINGLE_K};
use plagio::SearchEngine;

const DOCS: &[(&str, &str)] = &[
    ("A", "the quick brown fox jumps over the lazy dog and then some"),
    ("B", "pack my box with five dozen liquor jugs for the long trip home"),
    ("C", "the quick brown fox jumps over the lazy dog and then something else entirely"),
];

fn build(dir: &Path, name: &str) -> Result<PathBuf> {
    let corpus = dir.join(format!("{}.jsonl", name));
    let mut f = File::create(&corpus)?;
    for (id, text) in DOCS {
        writeln!(f, "{}", json!({ "doc_id": id, "text": text }))?;
    }
    let out = dir.join(name);
    build_index(
        &corpus,
        &out,
        &BuildOptions {
            threads: 1,
            ..BuildOptions::default()
        },
    )?;
    Ok(out)
}

#[test]
fn truncated_file_is_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;

    let bin = idx.join("index_native.bin");
    let mut bytes = std::fs::read(&bin)?;
    bytes.pop();
    std::fs::write(&bin, &bytes)?;

    let engine = SearchEngine::new();
    let err = engine.load(&idx).unwrap_err();
    assert_eq!(err.code(), "truncated");
    assert!(engine.snapshot().is_none());
    assert!(engine.search_text(DOCS[0].1, 10, 10).is_empty());
    Ok(())
}

#[test]
fn bad_magic_and_version_are_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;
    let bin = idx.join("index_native.bin");
    let orig = std::fs::read(&bin)?;

    let mut bad = orig.clone();
    bad[0] = b'X';
    std::fs::write(&bin, &bad)?;
    assert_eq!(
        LoadedIndex::load(&idx).unwrap_err().code(),
        "bad_magic"
    );

    let mut bad = orig.clone();
    bad[4..8].copy_from_slice(&99u32.to_le_bytes());
    std::fs::write(&bin, &bad)?;
    assert_eq!(
        LoadedIndex::load(&idx).unwrap_err().code(),
        "bad_version"
    );
    Ok(())
}

#[test]
fn out_of_range_doc_id_is_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;
    let bin = idx.join("index_native.bin");
    let mut bytes = std::fs::read(&bin)?;

    let n_docs = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let uniq = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
    let did_off = 44 + 20 * n_docs as usize + 8 * uniq as usize + 8 * (uniq as usize + 1);
    bytes[did_off..did_off + 4].copy_from_slice(&(n_docs + 7).to_le_bytes());
    std::fs::write(&bin, &bytes)?;

    let err = LoadedIndex::load(&idx).unwrap_err();
    assert_eq!(err.code(), "csr_invariant");
    Ok(())
}

#[test]
fn missing_docids_sidecar_is_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;
    std::fs::remove_file(idx.join("index_native_docids.json"))?;

    let err = LoadedIndex::load(&idx).unwrap_err();
    assert_eq!(err.code(), "doc_ids");
    Ok(())
}

#[test]
fn failed_reload_keeps_previous_index() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;

    let engine = SearchEngine::new();
    engine.load(&idx).map_err(|e| anyhow::anyhow!("{}", e))?;
    assert_eq!(engine.search_text(DOCS[0].1, 10, 10).len(), 2);

    let bin = idx.join("index_native.bin");
    let mut bytes = std::fs::read(&bin)?;
    bytes.truncate(10);
    std::fs::write(&bin, &bytes)?;

    assert!(engine.load(&idx).is_err());
    // old index still answers
    assert_eq!(engine.search_text(DOCS[0].1, 10, 10).len(), 2);
    Ok(())
}

#[test]
fn docids_longer_than_docs_is_truncated_not_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;
    std::fs::write(
        idx.join("index_native_docids.json"),
        json!(["A", "B", "C", "D", "E"]).to_string(),
    )?;

    let loaded = LoadedIndex::load(&idx).map_err(|e| anyhow::anyhow!("{}", e))?;
    assert_eq!(loaded.doc_ids().len(), loaded.n_docs() as usize);
    Ok(())
}

/// Every doc appears in exactly as many posting lists as it has distinct
/// shingles, and the CSR arrays honor their ordering invariants.
#[test]
fn csr_matches_recomputed_shingles() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let idx = build(tmp.path(), "idx")?;
    let bytes = std::fs::read(idx.join("index_native.bin"))?;

    let n_docs = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let uniq_cnt = u64::from_le_bytes(bytes[12..20].try_into().unwrap()) as usize;
    let did_cnt = u64::from_le_bytes(bytes[20..28].try_into().unwrap()) as usize;
    assert_eq!(n_docs, DOCS.len());

    let uniq_off = 44 + 20 * n_docs;
    let off_off = uniq_off + 8 * uniq_cnt;
    let did_off = off_off + 8 * (uniq_cnt + 1);

    let uniq: Vec<u64> = (0..uniq_cnt)
        .map(|i| u64::from_le_bytes(bytes[uniq_off + i * 8..uniq_off + i * 8 + 8].try_into().unwrap()))
        .collect();
    let off: Vec<u64> = (0..=uniq_cnt)
        .map(|i| u64::from_le_bytes(bytes[off_off + i * 8..off_off + i * 8 + 8].try_into().unwrap()))
        .collect();
    let did: Vec<u32> = (0..did_cnt)
        .map(|i| u32::from_le_bytes(bytes[did_off + i * 4..did_off + i * 4 + 4].try_into().unwrap()))
        .collect();

    // ordering invariants
    for w in uniq.windows(2) {
        assert!(w[0] < w[1]);
    }
    assert_eq!(off[0], 0);
    assert_eq!(off[uniq_cnt], did_cnt as u64);
    for i in 0..uniq_cnt {
        assert!(off[i] <= off[i + 1]);
        let slice = &did[off[i] as usize..off[i + 1] as usize];
        for w in slice.windows(2) {
            assert!(w[0] < w[1]);
        }
        for &d in slice {
            assert!((d as usize) < n_docs);
        }
    }

    // per-doc posting count equals distinct shingle count of its text
    let mut per_doc = vec![0usize; n_docs];
    for &d in &did {
        per_doc[d as usize] += 1;
    }
    for (doc, (_, raw_text)) in DOCS.iter().enumerate() {
        let norm = text::normalize(raw_text);
        let mut spans = Vec::new();
        text::tokenize_spans(&norm, &mut spans);
        let mut hashes = Vec::new();
        text::fill_shingle_hashes(&norm, &spans, SHINGLE_K, usize::MAX, &mut hashes);
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(per_doc[doc], hashes.len());
        // and every one of those hashes resolves in uniq
        for h in hashes {
            assert!(uniq.binary_search(&h).is_ok());
        }
    }
    Ok(())
}

#[test]
fn load_error_types_are_stable() {
    assert_eq!(LoadError::BadMagic.code(), "bad_magic");
    assert_eq!(LoadError::BadVersion(1).code(), "bad_version");
    assert_eq!(LoadError::Truncated(String::new()).code(), "truncated");
    assert_eq!(LoadError::CsrInvariant(String::new()).code(), "csr_invariant");
    assert_eq!(LoadError::Io(String::new()).code(), "io");
    assert_eq!(LoadError::DocIds(String::new()).code(), "doc_ids");
}
