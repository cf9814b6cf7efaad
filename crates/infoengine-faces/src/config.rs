use infoengine_core::{DistanceMetric, MatchPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("distance_threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f32),
}

/// Where face data lives and how matching is decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Root directory for all face data.
    pub data_dir: PathBuf,
    /// SQLite person registry.
    pub db_path: PathBuf,
    /// One `<id>.json` embedding per person.
    pub encodings_dir: PathBuf,
    /// One `<id>_<name>` photo per person.
    pub photos_dir: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Maximum distance (exclusive) for two faces to count as the same person.
    pub distance_threshold: f32,
    pub metric: DistanceMetric,
    pub match_policy: MatchPolicy,
}

/// On-disk form: every field optional, paths relative to `data_dir`
/// unless absolute.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    encodings_dir: Option<PathBuf>,
    photos_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    distance_threshold: Option<f32>,
    metric: Option<DistanceMetric>,
    match_policy: Option<MatchPolicy>,
}

pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

impl Config {
    /// Every path rooted in `data_dir`, default matching parameters.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join("people.db"),
            encodings_dir: data_dir.join("encodings"),
            photos_dir: data_dir.join("photos"),
            model_dir: data_dir.join("models"),
            data_dir,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            metric: DistanceMetric::default(),
            match_policy: MatchPolicy::default(),
        }
    }

    /// Defaults, then the optional TOML file, then `INFOENGINE_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let parsed = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_file(parsed, default_data_dir())?;
        config.apply_env();
        Ok(config)
    }

    fn from_file(file: ConfigFile, default_root: PathBuf) -> Result<Self, ConfigError> {
        let mut config = Self::in_dir(file.data_dir.unwrap_or(default_root));
        let root = config.data_dir.clone();
        let rooted = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };

        if let Some(p) = file.db_path {
            config.db_path = rooted(p);
        }
        if let Some(p) = file.encodings_dir {
            config.encodings_dir = rooted(p);
        }
        if let Some(p) = file.photos_dir {
            config.photos_dir = rooted(p);
        }
        if let Some(p) = file.model_dir {
            config.model_dir = rooted(p);
        }
        if let Some(t) = file.distance_threshold {
            if !valid_threshold(t) {
                return Err(ConfigError::InvalidThreshold(t));
            }
            config.distance_threshold = t;
        }
        if let Some(m) = file.metric {
            config.metric = m;
        }
        if let Some(p) = file.match_policy {
            config.match_policy = p;
        }
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = env_path("INFOENGINE_DATA_DIR") {
            let rest = Self::in_dir(dir);
            self.db_path = rest.db_path;
            self.encodings_dir = rest.encodings_dir;
            self.photos_dir = rest.photos_dir;
            self.model_dir = rest.model_dir;
            self.data_dir = rest.data_dir;
        }
        if let Some(p) = env_path("INFOENGINE_DB_PATH") {
            self.db_path = p;
        }
        if let Some(p) = env_path("INFOENGINE_MODEL_DIR") {
            self.model_dir = p;
        }
        if let Ok(raw) = std::env::var("INFOENGINE_DISTANCE_THRESHOLD") {
            match parse_threshold(&raw) {
                Some(t) => self.distance_threshold = t,
                None => tracing::warn!(
                    key = "INFOENGINE_DISTANCE_THRESHOLD",
                    value = %raw,
                    "ignoring threshold override that is not a positive finite number"
                ),
            }
        }
        self.metric = env_parse("INFOENGINE_METRIC", self.metric);
        self.match_policy = env_parse("INFOENGINE_MATCH_POLICY", self.match_policy);
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("infoengine")
}

// Distances are compared with a strict `<`, so zero or NaN matches nothing.
fn valid_threshold(t: f32) -> bool {
    t.is_finite() && t > 0.0
}

fn parse_threshold(raw: &str) -> Option<f32> {
    raw.trim().parse().ok().filter(|t| valid_threshold(*t))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment override");
            default
        }),
        Err(_) => default,
    }
}
