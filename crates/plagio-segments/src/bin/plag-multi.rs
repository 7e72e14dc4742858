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
use std::io::Read;

use plagio_segments::multi_search_json;

#[derive(Parser, Debug)]
#[command(name = "plag-multi", about = "Fan-out query across several indexes")]
struct Args {
    /// Index directories to search
    #[arg(required = true)]
    dirs: Vec<String>,
    /// Query text; reads stdin when omitted
    #[arg(long)]
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

    println!("{}", multi_search_json(&query, args.top_k, &args.dirs));
    Ok(())
}
