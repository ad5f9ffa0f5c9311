// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zoekt_index::config::{load_engine_config, MergeOpts};
use zoekt_index::{Cancellation, EngineConfig, FileMatch, ShardedSearcher, Q};

#[derive(Parser, Debug)]
#[command(name = "zr-search", about = "Search the shards in a directory")]
struct Args {
    /// Directory holding *.zoekt shards
    index: PathBuf,
    /// Query pattern (literal substring by default)
    query: String,
    /// Treat the pattern as a regular expression
    #[arg(long)]
    regex: bool,
    /// Match file names only
    #[arg(long, conflicts_with = "content")]
    file: bool,
    /// Match content only
    #[arg(long)]
    content: bool,
    /// Restrict matches to symbol definitions
    #[arg(long)]
    symbol: bool,
    /// Case sensitive matching
    #[arg(long)]
    case: bool,
    /// Restrict to repositories whose name matches this regex
    #[arg(long)]
    repo: Option<String>,
    /// Restrict to a branch
    #[arg(long)]
    branch: Option<String>,
    /// Lines of context around each match
    #[arg(long)]
    context: Option<usize>,
    /// Return chunk matches instead of line matches
    #[arg(long)]
    chunks: bool,
    /// Rank with BM25 instead of the default scoring
    #[arg(long)]
    bm25: bool,
    /// Maximum number of files to print (0 = unlimited)
    #[arg(long, default_value_t = 50)]
    limit: usize,
    /// Include the score breakdown in the output
    #[arg(long)]
    debug_score: bool,
    /// Emit JSON (one file match per line)
    #[arg(long)]
    json: bool,
    /// List matching repositories instead of searching
    #[arg(long)]
    list: bool,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn build_query(args: &Args) -> Q {
    let mut atom = if args.regex { Q::regexp(&args.query) } else { Q::substring(&args.query) };
    match &mut atom {
        Q::Substring(s) => {
            s.file_name = args.file;
            s.content = args.content;
        }
        Q::Regexp(r) => {
            r.file_name = args.file;
            r.content = args.content;
        }
        _ => {}
    }
    if args.case {
        atom = atom.case_sensitive();
    }
    if args.symbol {
        atom = Q::symbol(atom);
    }

    let mut parts = vec![atom];
    if let Some(r) = &args.repo {
        parts.push(Q::Repo(r.clone()));
    }
    if let Some(b) = &args.branch {
        parts.push(Q::Branch {
            pattern: b.clone(),
            exact: true,
        });
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Q::and(parts)
    }
}

fn print_file(fm: &FileMatch, debug_score: bool) {
    let score = if debug_score {
        format!(" [{:.2} {}]", fm.score, fm.debug.trim_end_matches(", "))
    } else {
        String::new()
    };
    println!("{}/{}{}", fm.repository, fm.file_name, score);
    for lm in &fm.line_matches {
        if lm.file_name {
            continue;
        }
        println!("  {}: {}", lm.line_number, String::from_utf8_lossy(&lm.line));
    }
    for cm in &fm.chunk_matches {
        if cm.file_name {
            continue;
        }
        let text = String::from_utf8_lossy(&cm.content);
        for (i, line) in text.lines().enumerate() {
            println!("  {}: {}", cm.content_start.line_number as usize + i, line);
        }
        println!("  --");
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let cfg = load_engine_config(
        EngineConfig::default(),
        MergeOpts {
            config_path: args.config.clone(),
            cli_context_lines: args.context,
            cli_chunk_matches: args.chunks.then_some(true),
            cli_bm25: args.bm25.then_some(true),
            cli_shard_max_match_count: None,
        },
    )?;

    let searcher = ShardedSearcher::open_dir(&args.index)
        .with_context(|| format!("loading shards from {}", args.index.display()))?;
    let q = build_query(&args);
    debug!(query = ?q, shards = searcher.len(), "searching");

    if args.list {
        let list = searcher.list(&q, &Default::default())?;
        for r in &list.repos {
            if args.json {
                println!("{}", serde_json::to_string(&r.repository)?);
            } else {
                println!("{} ({} docs)", r.repository.name, r.stats.documents);
            }
        }
        return Ok(());
    }

    let mut opts = cfg.search_options();
    opts.max_doc_display_count = args.limit;
    opts.debug_score = args.debug_score;
    let cancel = Cancellation::from_options(&opts);
    let res = searcher.search(&q, &opts, &cancel)?;

    for fm in &res.files {
        if args.json {
            println!("{}", serde_json::to_string(fm)?);
        } else {
            print_file(fm, args.debug_score);
        }
    }
    eprintln!(
        "{} files, {} matches in {:?} ({} files considered, {} shards skipped)",
        res.files.len(),
        res.stats.match_count,
        res.stats.duration,
        res.stats.files_considered,
        res.stats.shards_skipped
    );
    Ok(())
}
