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
use regex::Regex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zoekt_index::config::{load_engine_config, MergeOpts};
use zoekt_index::shard::{shard_name, INDEX_FORMAT_VERSION};
use zoekt_index::{DirectoryIndexer, EngineConfig, Repository};

#[derive(Parser, Debug)]
#[command(name = "zr-index", about = "Index a directory tree into a single repository shard")]
struct Args {
    /// Path to repository root
    repo: PathBuf,
    /// Directory to write the shard into (defaults to <repo>/.data)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Repository name stored in the shard (defaults to the directory name)
    #[arg(long)]
    name: Option<String>,
    /// Repository id
    #[arg(long, default_value_t = 1)]
    id: u32,
    /// Branch name recorded for every document
    #[arg(long, default_value = "HEAD")]
    branch: String,
    /// Branch version (commit) recorded in the repository metadata
    #[arg(long, default_value = "")]
    version: String,
    /// Priority stored in the repository raw config
    #[arg(long)]
    priority: Option<f64>,
    /// Maximum file size in bytes; larger files are stored as skipped
    #[arg(long, default_value_t = 2 << 20)]
    max_file_size: usize,
    /// Index dot files and directories
    #[arg(long)]
    hidden: bool,
    /// Only index paths matching this regex
    #[arg(long)]
    include: Option<String>,
    /// Skip paths matching this regex
    #[arg(long)]
    exclude: Option<String>,
    /// TOML config file (file_mode is the only key used here)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Build the shard but do not write it
    #[arg(long)]
    no_write: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let root = args
        .repo
        .canonicalize()
        .with_context(|| format!("resolving {}", args.repo.display()))?;
    let name = match &args.name {
        Some(n) => n.clone(),
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string()),
    };

    let mut repo =
        Repository::new(args.id, &name).with_branches(&[(args.branch.as_str(), args.version.as_str())]);
    if let Some(p) = args.priority {
        repo.raw_config.insert("priority".to_string(), p.to_string());
    }

    let mut indexer = DirectoryIndexer::new(root.clone(), repo)
        .max_file_size(args.max_file_size)
        .include_hidden(args.hidden);
    if let Some(re) = &args.include {
        indexer = indexer.include_regex(Regex::new(re).context("--include")?);
    }
    if let Some(re) = &args.exclude {
        indexer = indexer.exclude_regex(Regex::new(re).context("--exclude")?);
    }
    let builder = indexer.build().context("indexing")?;

    let cfg = load_engine_config(
        EngineConfig::default(),
        MergeOpts {
            config_path: args.config.clone(),
            ..Default::default()
        },
    )?;

    let dir = args.out.clone().unwrap_or_else(|| root.join(".data"));
    let shard = shard_name(&dir, &name, INDEX_FORMAT_VERSION, 0);
    if args.no_write {
        println!(
            "built shard (no-write): {} docs, {} content bytes, shard path: {}",
            builder.num_files(),
            builder.content_size(),
            shard.display()
        );
        return Ok(());
    }

    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    builder
        .write_to_path(&shard, &cfg.write)
        .with_context(|| format!("writing {}", shard.display()))?;
    info!(shard = %shard.display(), docs = builder.num_files(), "wrote shard");
    println!("wrote shard: {} ({} docs)", shard.display(), builder.num_files());
    Ok(())
}
