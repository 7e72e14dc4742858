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

use anyhow::Result;
use clap::Parser;

use plagio::index::{build_index, BuildOptions};

#[derive(Parser, Debug)]
#[command(
    name = "index_builder",
    about = "Build a shingle index from a JSONL corpus"
)]
struct Args {
    /// Corpus file, one {"doc_id": ..., "text": ...} object per line
    corpus: std::path::PathBuf,
    /// Output index directory
    out_dir: std::path::PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let opts = BuildOptions::from_env();
    let report = build_index(&args.corpus, &args.out_dir, &opts)?;

    println!(
        "built {}: docs={} uniq={} postings={} bad_lines={}",
        args.out_dir.display(),
        report.docs_ok,
        report.uniq_cnt,
        report.did_cnt,
        report.docs_bad
    );
    Ok(())
}
