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

use thiserror::Error;

/// Typed errors returned by shard building, loading and searching.
#[derive(Debug, Error)]
pub enum ZoektError {
    /// The shard was written by an incompatible format or needs a newer reader.
    #[error("{file}: unsupported index version {format_version} (min reader feature {min_reader_version}, have {feature_version})")]
    VersionMismatch {
        file: String,
        format_version: u32,
        min_reader_version: u32,
        feature_version: u32,
    },
    /// Malformed section, unknown section kind or violated structural invariant.
    #[error("{file}: {msg}")]
    Format { file: String, msg: String },
    /// A section or item points outside the mapped file.
    #[error("{file}: read out of bounds (off={off}, sz={sz}, len={len})")]
    OutOfBounds {
        file: String,
        off: u64,
        sz: u64,
        len: u64,
    },
    /// Rejected input at `add`/`write` time.
    #[error("build: {0}")]
    Build(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

impl ZoektError {
    pub(crate) fn format(file: impl Into<String>, msg: impl Into<String>) -> Self {
        ZoektError::Format {
            file: file.into(),
            msg: msg.into(),
        }
    }

    pub(crate) fn build(msg: impl Into<String>) -> Self {
        ZoektError::Build(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ZoektError>;
