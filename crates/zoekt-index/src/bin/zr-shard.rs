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

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zoekt_index::config::{load_engine_config, MergeOpts};
use zoekt_index::shard::merge::{explode_to_dir, merge_to_dir};
use zoekt_index::shard::tombstone::{set_tombstone, unset_tombstone};
use zoekt_index::{EngineConfig, IndexData};

#[derive(Parser, Debug)]
#[command(name = "zr-shard", about = "Shard maintenance: merge, explode, tombstones, stats")]
struct Args {
    /// TOML config file (file_mode controls written shard permissions)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Merge single repository shards into one compound shard
    Merge {
        /// Output directory
        #[arg(long)]
        out: PathBuf,
        /// Delete the input shards after a successful merge
        #[arg(long)]
        remove_inputs: bool,
        shards: Vec<PathBuf>,
    },
    /// Split a compound shard into one shard per repository
    Explode {
        #[arg(long)]
        out: PathBuf,
        shard: PathBuf,
    },
    /// Mark a repository of a shard as deleted
    Tombstone { shard: PathBuf, repo_id: u32 },
    /// Undo a tombstone
    Untombstone { shard: PathBuf, repo_id: u32 },
    /// Print shard metadata and per repository statistics as JSON
    Stats { shard: PathBuf },
}

fn open(path: &PathBuf) -> Result<IndexData> {
    IndexData::open(path).with_context(|| format!("opening {}", path.display()))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let cfg = load_engine_config(
        EngineConfig::default(),
        MergeOpts {
            config_path: args.config.clone(),
            ..Default::default()
        },
    )?;

    match args.cmd {
        Cmd::Merge {
            out,
            remove_inputs,
            shards,
        } => {
            if shards.is_empty() {
                bail!("merge needs at least one shard");
            }
            let data = shards.iter().map(open).collect::<Result<Vec<_>>>()?;
            let refs: Vec<&IndexData> = data.iter().collect();
            std::fs::create_dir_all(&out)?;
            let path = merge_to_dir(&refs, &out, &cfg.write)?;
            println!("{}", path.display());
            if remove_inputs {
                drop(data);
                for s in &shards {
                    std::fs::remove_file(s).with_context(|| format!("removing {}", s.display()))?;
                }
            }
        }
        Cmd::Explode { out, shard } => {
            let d = open(&shard)?;
            std::fs::create_dir_all(&out)?;
            for p in explode_to_dir(&d, &out, &cfg.write)? {
                println!("{}", p.display());
            }
        }
        Cmd::Tombstone { shard, repo_id } => {
            if !set_tombstone(&shard, repo_id, &cfg.write)? {
                bail!("repository {repo_id} not found in {}", shard.display());
            }
        }
        Cmd::Untombstone { shard, repo_id } => {
            if !unset_tombstone(&shard, repo_id, &cfg.write)? {
                bail!("repository {repo_id} not found in {}", shard.display());
            }
        }
        Cmd::Stats { shard } => {
            let d = open(&shard)?;
            let repos: Vec<serde_json::Value> = d
                .repositories()
                .iter()
                .zip(d.repo_stats())
                .map(|(r, s)| {
                    serde_json::json!({
                        "id": r.id,
                        "name": r.name,
                        "tombstone": r.tombstone,
                        "priority": r.priority(),
                        "stats": s,
                    })
                })
                .collect();
            let out = serde_json::json!({
                "path": shard.display().to_string(),
                "metadata": d.metadata(),
                "documents": d.num_docs(),
                "memory_use": d.memory_use(),
                "repositories": repos,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
