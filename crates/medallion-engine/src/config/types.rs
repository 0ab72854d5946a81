//! Pipeline configuration model.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use medallion_types::Layer;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Env var holding the process-wide default chunk size.
pub const BATCH_SIZE_ENV: &str = "PIPELINE_BATCH_SIZE";
/// Env var holding the default `SQLite` database path.
pub const DB_PATH_ENV: &str = "MEDALLION_DB_PATH";
/// Env var holding a `PostgreSQL` connection string.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Env var holding the default data directory.
pub const DATA_DIR_ENV: &str = "PIPELINE_DATA_DIR";

/// Chunk size used when neither configuration nor environment sets one.
pub const DEFAULT_CHUNK_SIZE: u32 = 5;

const DEFAULT_DB_PATH: &str = "medallion.db";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_EXTENSION: &str = "csv";

/// Column names every source must carry, in order.
pub const EXPECTED_HEADER: [&str; 3] = ["timestamp", "price", "user_id"];

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub chunk_size: ChunkSize,
    #[serde(default)]
    pub stages: StageSelection,
}

impl PipelineConfig {
    /// Configuration built from environment defaults only.
    ///
    /// `DATABASE_URL` selects the `PostgreSQL` backend; otherwise `SQLite`
    /// at `MEDALLION_DB_PATH` (default `medallion.db`).
    #[must_use]
    pub fn from_env() -> Self {
        let state = match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => StateConfig {
                backend: StateBackendKind::Postgres,
                path: None,
                connection: Some(url),
            },
            _ => StateConfig {
                backend: StateBackendKind::Sqlite,
                path: std::env::var(DB_PATH_ENV).ok().map(PathBuf::from),
                connection: None,
            },
        };
        let mut source = SourceConfig::default();
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            source.data_dir = PathBuf::from(dir);
        }
        Self {
            state,
            source,
            chunk_size: ChunkSize::Auto,
            stages: StageSelection::All,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Which layer store implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// `SQLite` database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `PostgreSQL` connection string.
    #[serde(default)]
    pub connection: Option<String>,
}

impl StateConfig {
    /// `SQLite` path, falling back to `MEDALLION_DB_PATH` then `medallion.db`.
    #[must_use]
    pub fn sqlite_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::var(DB_PATH_ENV).map_or_else(|_| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from)
        })
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Source labels (file names) skipped before ingestion.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_expected_header")]
    pub expected_header: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extension: default_extension(),
            exclude: Vec::new(),
            expected_header: default_expected_header(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_expected_header() -> Vec<String> {
    EXPECTED_HEADER.iter().map(ToString::to_string).collect()
}

/// Split exclusion values that may be repeated and/or comma-separated.
/// Blank parts are dropped and duplicates removed, keeping first-seen order.
#[must_use]
pub fn parse_excludes<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        for part in value.as_ref().split(',') {
            let part = part.trim();
            if !part.is_empty() && !out.iter().any(|seen| seen == part) {
                out.push(part.to_string());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Chunk size
// ---------------------------------------------------------------------------

/// Rows per committed chunk: `auto` or an explicit count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkSize {
    /// Use `PIPELINE_BATCH_SIZE`, default 5.
    #[default]
    Auto,
    /// Explicit count as given; non-positive values clamp to 1.
    Fixed(i64),
}

impl ChunkSize {
    /// Resolve to a positive row count, reading the environment for `Auto`.
    #[must_use]
    pub fn resolve(self) -> u32 {
        match self {
            Self::Auto => std::env::var(BATCH_SIZE_ENV)
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .map_or(DEFAULT_CHUNK_SIZE, clamp_chunk),
            Self::Fixed(n) => clamp_chunk(n),
        }
    }
}

fn clamp_chunk(n: i64) -> u32 {
    u32::try_from(n.max(1)).unwrap_or(u32::MAX)
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for ChunkSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        trimmed
            .parse::<i64>()
            .map(Self::Fixed)
            .map_err(|_| format!("invalid chunk size '{s}': expected 'auto' or an integer"))
    }
}

impl Serialize for ChunkSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Fixed(n) => serializer.serialize_i64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for ChunkSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Count(n) => Ok(Self::Fixed(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage selection
// ---------------------------------------------------------------------------

/// Which stages a `load` invocation runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageSelection {
    /// RAW only.
    Raw,
    /// RAW then SILVER.
    Silver,
    /// GOLD only.
    Gold,
    #[default]
    All,
}

impl StageSelection {
    /// Layers to run, in pipeline order.
    #[must_use]
    pub fn layers(self) -> &'static [Layer] {
        match self {
            Self::Raw => &[Layer::Raw],
            Self::Silver => &[Layer::Raw, Layer::Silver],
            Self::Gold => &[Layer::Gold],
            Self::All => &[Layer::Raw, Layer::Silver, Layer::Gold],
        }
    }
}

impl FromStr for StageSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown stage '{other}': expected raw, silver, gold or all"
            )),
        }
    }
}
