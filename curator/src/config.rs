use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{CurateError, Result};
use crate::filter::{DEFAULT_PLACEHOLDER_ID_PREFIXES, EntryThreshold, FilterRules};
use crate::migrate::PatchRule;
use crate::score::{LogFollowerScorer, Scorer, scorer_for};
use crate::store::OnMalformed;

// ── Defaults ────────────────────────────────────────────────────────────

/// Store file relative to the working directory.
const DEFAULT_STORE_REL: &str = "data/index.jsonl";

/// Manifest file relative to the working directory.
const DEFAULT_MANIFEST_REL: &str = "data/manifest.json";

const DEFAULT_SCHEMA_VERSION: &str = "1.0";
const DEFAULT_KEEP_ARCHIVES: usize = 3;

// ── Config struct ───────────────────────────────────────────────────────

/// Everything one reconcile run needs, replacing the per-batch scripts.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub store: PathBuf,
    pub manifest: PathBuf,
    /// Batch files merged in this run, in order.
    pub incoming: Vec<PathBuf>,
    /// Directory of `*.jsonl` batches, merged after `incoming` in file-name order.
    pub incoming_dir: Option<PathBuf>,
    pub on_malformed: OnMalformed,
    pub schema_version: String,
    /// Replaced snapshots to retain next to the store. 0 disables archiving.
    pub keep_archives: usize,
    pub placeholder_id_prefixes: Vec<String>,
    pub threshold: EntryThreshold,
    pub scorer: ScorerConfig,
    #[serde(rename = "patch")]
    pub patches: Vec<PatchRule>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub version: String,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            version: LogFollowerScorer::VERSION.to_string(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE_REL),
            manifest: PathBuf::from(DEFAULT_MANIFEST_REL),
            incoming: Vec::new(),
            incoming_dir: None,
            on_malformed: OnMalformed::Skip,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            keep_archives: DEFAULT_KEEP_ARCHIVES,
            placeholder_id_prefixes: DEFAULT_PLACEHOLDER_ID_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            threshold: EntryThreshold::default(),
            scorer: ScorerConfig::default(),
            patches: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `ROSTER_*` environment variables.
    pub fn from_env() -> Self {
        let home = dirs::home_dir();
        let home = home.as_deref();
        let defaults = Self::default();

        Self {
            store: env_path("ROSTER_STORE_PATH", defaults.store.clone(), home),
            manifest: env_path("ROSTER_MANIFEST_PATH", defaults.manifest.clone(), home),
            on_malformed: env_on_malformed("ROSTER_ON_MALFORMED", defaults.on_malformed),
            keep_archives: env_usize("ROSTER_KEEP_ARCHIVES", defaults.keep_archives),
            ..defaults
        }
    }

    /// Parse a TOML run config. Relative paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CurateError::io("read config", path, e))?;
        let config = Self::parse(&text)
            .map_err(|e| CurateError::Config(format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_relative(base))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn resolve_relative(mut self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.store = join(self.store);
        self.manifest = join(self.manifest);
        self.incoming = self.incoming.into_iter().map(join).collect();
        self.incoming_dir = self.incoming_dir.map(join);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold.verified_min > self.threshold.unverified_min {
            return Err(CurateError::Config(format!(
                "threshold.verified_min ({}) exceeds threshold.unverified_min ({})",
                self.threshold.verified_min, self.threshold.unverified_min
            )));
        }
        if scorer_for(&self.scorer.version).is_none() {
            return Err(CurateError::Config(format!(
                "unknown scorer version '{}'",
                self.scorer.version
            )));
        }
        if self.store == self.manifest {
            return Err(CurateError::Config(
                "store and manifest must be different files".to_string(),
            ));
        }
        Ok(())
    }

    pub fn filter_rules(&self) -> FilterRules {
        FilterRules {
            threshold: self.threshold,
            placeholder_prefixes: self.placeholder_id_prefixes.clone(),
        }
    }

    pub fn scorer(&self) -> Result<Box<dyn Scorer>> {
        scorer_for(&self.scorer.version).ok_or_else(|| {
            CurateError::Config(format!("unknown scorer version '{}'", self.scorer.version))
        })
    }

    /// Explicit batch files first, then the batch directory sorted by file name.
    pub fn incoming_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.incoming.clone();
        let Some(dir) = &self.incoming_dir else {
            return Ok(files);
        };
        if !dir.is_dir() {
            return Err(CurateError::io(
                "read incoming dir",
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let mut discovered: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("jsonl"))
            .map(|e| e.path().to_path_buf())
            .collect();
        discovered.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

        for path in discovered {
            if !files.contains(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn env_path(key: &str, default: PathBuf, home: Option<&Path>) -> PathBuf {
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => expand_tilde(&val, home),
        _ => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_on_malformed(key: &str, default: OnMalformed) -> OnMalformed {
    match env::var(key).map(|v| v.to_lowercase()) {
        Ok(v) if v == "abort" || v == "strict" => OnMalformed::Abort,
        Ok(v) if v == "skip" => OnMalformed::Skip,
        _ => default,
    }
}

fn expand_tilde(input: &str, home: Option<&Path>) -> PathBuf {
    match (input.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if input == "~" => home.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(input)),
        _ => PathBuf::from(input),
    }
}
