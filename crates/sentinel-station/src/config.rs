use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Station configuration: optional TOML file, then `SENTINEL_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Watch-list source: a JSON file path or an http(s) URL.
    pub directory: String,
    /// SQLite database holding raised alerts.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe matches.
    pub match_threshold: f32,
    /// Candidates processed per gallery build; unbounded when absent.
    pub max_candidates: Option<usize>,
    /// Timeout for each directory or reference-image request.
    pub fetch_timeout_secs: u64,
    /// Recorded on every alert raised by this station.
    pub station_id: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: sentinel_core::default_model_dir(),
            directory: data_dir.join("watchlist.json").to_string_lossy().into_owned(),
            db_path: data_dir.join("alerts.db"),
            match_threshold: sentinel_core::DEFAULT_MATCH_THRESHOLD,
            max_candidates: None,
            fetch_timeout_secs: 10,
            station_id: "station-1".to_string(),
        }
    }
}

impl Config {
    /// Load from `SENTINEL_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let base = match std::env::var("SENTINEL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `SENTINEL_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("SENTINEL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SENTINEL_DIRECTORY") {
            self.directory = v;
        }
        if let Some(v) = lookup("SENTINEL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "SENTINEL_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = lookup("SENTINEL_MAX_CANDIDATES") {
            // "0" or "none" lifts the bound.
            self.max_candidates = v.parse().ok().filter(|&n: &usize| n > 0);
        }
        if let Some(v) = parsed(&lookup, "SENTINEL_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = lookup("SENTINEL_STATION_ID") {
            self.station_id = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            bail!("match threshold must be a positive number, got {}", self.match_threshold);
        }
        if self.directory.trim().is_empty() {
            bail!("no identity directory configured (set SENTINEL_DIRECTORY)");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch timeout must be at least one second");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("sentinel")
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
