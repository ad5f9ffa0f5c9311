use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ZoektError};
use crate::types::SearchOptions;

/// Permission bits for files the engine persists (shards and `.meta`
/// sidecars). Computed once from the process umask and passed explicitly to
/// every write path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub file_mode: u32,
}

impl WriteOptions {
    /// Read the umask once and derive `0o666 &^ umask`.
    pub fn from_process() -> Self {
        WriteOptions {
            file_mode: 0o666 & !process_umask(),
        }
    }

    pub fn with_mode(file_mode: u32) -> Self {
        WriteOptions { file_mode }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { file_mode: 0o644 }
    }
}

/// The umask can only be read by setting it, so set and restore.
fn process_umask() -> u32 {
    // SAFETY: umask has no memory-safety preconditions.
    unsafe {
        let old = libc::umask(0o022);
        libc::umask(old);
        old as u32
    }
}

/// Search defaults and write options for binaries and embedders.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub shard_max_match_count: usize,
    pub total_max_match_count: usize,
    pub shard_repo_max_match_count: usize,
    pub num_context_lines: usize,
    pub chunk_matches: bool,
    pub use_document_ranks: bool,
    pub document_ranks_weight: f64,
    pub use_bm25_scoring: bool,
    pub max_wall_time: Option<Duration>,
    pub write: WriteOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shard_max_match_count: 10_000,
            total_max_match_count: 100_000,
            shard_repo_max_match_count: 0,
            num_context_lines: 0,
            chunk_matches: false,
            use_document_ranks: false,
            document_ranks_weight: 0.0,
            use_bm25_scoring: false,
            max_wall_time: None,
            write: WriteOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            shard_max_match_count: self.shard_max_match_count,
            total_max_match_count: self.total_max_match_count,
            shard_repo_max_match_count: self.shard_repo_max_match_count,
            num_context_lines: self.num_context_lines,
            chunk_matches: self.chunk_matches,
            use_document_ranks: self.use_document_ranks,
            document_ranks_weight: self.document_ranks_weight,
            use_bm25_scoring: self.use_bm25_scoring,
            max_wall_time: self.max_wall_time,
            ..Default::default()
        }
    }
}

/// CLI-level overrides that binaries pass to `load_engine_config`.
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<PathBuf>,
    pub cli_context_lines: Option<usize>,
    pub cli_chunk_matches: Option<bool>,
    pub cli_bm25: Option<bool>,
    pub cli_shard_max_match_count: Option<usize>,
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Load and merge from: defaults <- config file <- env vars <- CLI.
pub fn load_engine_config(mut base: EngineConfig, opts: MergeOpts) -> Result<EngineConfig> {
    if let Some(path) = opts.config_path.as_ref() {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            let v: toml::Value = toml::from_str(&s)
                .map_err(|e| ZoektError::Config(format!("{}: {e}", path.display())))?;
            let int = |k: &str| v.get(k).and_then(|x| x.as_integer()).filter(|i| *i >= 0);
            let flag = |k: &str| v.get(k).and_then(|x| x.as_bool());
            if let Some(n) = int("shard_max_match_count") {
                base.shard_max_match_count = n as usize;
            }
            if let Some(n) = int("total_max_match_count") {
                base.total_max_match_count = n as usize;
            }
            if let Some(n) = int("shard_repo_max_match_count") {
                base.shard_repo_max_match_count = n as usize;
            }
            if let Some(n) = int("num_context_lines") {
                base.num_context_lines = n as usize;
            }
            if let Some(n) = int("max_wall_time_ms") {
                base.max_wall_time = Some(Duration::from_millis(n as u64));
            }
            if let Some(b) = flag("chunk_matches") {
                base.chunk_matches = b;
            }
            if let Some(b) = flag("use_document_ranks") {
                base.use_document_ranks = b;
            }
            if let Some(b) = flag("use_bm25_scoring") {
                base.use_bm25_scoring = b;
            }
            if let Some(w) = v.get("document_ranks_weight").and_then(|x| x.as_float()) {
                base.document_ranks_weight = w;
            }
            if let Some(m) = v.get("file_mode").and_then(|x| x.as_str()) {
                let mode = u32::from_str_radix(m.trim_start_matches("0o"), 8)
                    .map_err(|e| ZoektError::Config(format!("file_mode {m:?}: {e}")))?;
                base.write = WriteOptions::with_mode(mode);
            }
        }
    }

    // env vars override file
    if let Some(n) = parse_env("ZOEKT_SHARD_MAX_MATCH_COUNT") {
        base.shard_max_match_count = n;
    }
    if let Some(n) = parse_env("ZOEKT_TOTAL_MAX_MATCH_COUNT") {
        base.total_max_match_count = n;
    }
    if let Some(n) = parse_env("ZOEKT_NUM_CONTEXT_LINES") {
        base.num_context_lines = n;
    }
    if let Some(b) = parse_env("ZOEKT_CHUNK_MATCHES") {
        base.chunk_matches = b;
    }
    if let Some(b) = parse_env("ZOEKT_USE_BM25_SCORING") {
        base.use_bm25_scoring = b;
    }
    if let Some(ms) = parse_env::<u64>("ZOEKT_MAX_WALL_TIME_MS") {
        base.max_wall_time = Some(Duration::from_millis(ms));
    }

    // CLI overrides everything
    if let Some(n) = opts.cli_context_lines {
        base.num_context_lines = n;
    }
    if let Some(b) = opts.cli_chunk_matches {
        base.chunk_matches = b;
    }
    if let Some(b) = opts.cli_bm25 {
        base.use_bm25_scoring = b;
    }
    if let Some(n) = opts.cli_shard_max_match_count {
        base.shard_max_match_count = n;
    }
    Ok(base)
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for k in [
            "ZOEKT_SHARD_MAX_MATCH_COUNT",
            "ZOEKT_TOTAL_MAX_MATCH_COUNT",
            "ZOEKT_NUM_CONTEXT_LINES",
            "ZOEKT_CHUNK_MATCHES",
            "ZOEKT_USE_BM25_SCORING",
            "ZOEKT_MAX_WALL_TIME_MS",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn umask_mode_drops_write_bits() {
        let w = WriteOptions::from_process();
        assert_eq!(w.file_mode & !0o666, 0);
    }

    #[test]
    #[serial_test::serial]
    fn file_env_cli_precedence() {
        init_test_logging();
        clear_env();
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(
            tmp.path(),
            r#"
shard_max_match_count = 5
num_context_lines = 2
chunk_matches = true
file_mode = "0o600"
"#,
        )
        .unwrap();
        std::env::set_var("ZOEKT_NUM_CONTEXT_LINES", "3");
        std::env::set_var("ZOEKT_USE_BM25_SCORING", "true");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            cli_chunk_matches: Some(false),
            ..Default::default()
        };
        let got = load_engine_config(EngineConfig::default(), opts).expect("load");
        assert_eq!(got.shard_max_match_count, 5);
        assert_eq!(got.num_context_lines, 3);
        assert!(got.use_bm25_scoring);
        assert!(!got.chunk_matches);
        assert_eq!(got.write.file_mode, 0o600);
        let so = got.search_options();
        assert_eq!(so.num_context_lines, 3);
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn bad_env_values_are_ignored() {
        clear_env();
        std::env::set_var("ZOEKT_TOTAL_MAX_MATCH_COUNT", "lots");
        let got = load_engine_config(EngineConfig::default(), MergeOpts::default()).unwrap();
        assert_eq!(got.total_max_match_count, EngineConfig::default().total_max_match_count);
        clear_env();
    }
}
