// Copyright 2025 Plagio Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::Read;

use plagio::SearchEngine;

#[derive(Parser, Debug)]
#[command(name = "plag-search", about = "Query a single shingle index")]
struct Args {
    /// Index directory
    dir: std::path::PathBuf,
    /// Query text; reads stdin when omitted
    query: Option<String>,
    /// Number of hits to return
    #[arg(long, default_value_t = 10)]
    top_k: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let query = match args.query {
        Some(q) => q,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read query from stdin")?;
            buf
        }
    };

    let engine = SearchEngine::new();
    engine
        .load(&args.dir)
        .map_err(|e| anyhow::anyhow!("load {}: {} ({})", args.dir.display(), e, e.code()))?;

    let idx = engine
        .snapshot()
        .context("engine has no loaded index")?;
    let hits = idx.search_text(&query, args.top_k, args.top_k);

    let out: Vec<_> = hits
        .iter()
        .map(|h| {
            json!({
                "doc_id": idx.doc_ids().get(h.doc as usize),
                "local_doc_id": h.doc,
                "score": h.score,
                "j9": h.j,
                "c9": h.c,
                "cand_hits": h.cand_hits,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&json!({ "count": out.len(), "hits": out }))?);
    Ok(())
}
