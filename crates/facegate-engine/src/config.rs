use facegate_core::detector::{CenteredConfig, ChainConfig, SkinToneConfig};
use facegate_core::embedding::ImageGate;
use facegate_core::liveness::{LivenessConfig, LivenessMode, DEFAULT_MIN_EYE_DISPLACEMENT};
use facegate_core::matcher::{Metric, DEFAULT_MATCH_THRESHOLD};
use facegate_core::quality::QualityWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "FACEGATE_CONFIG";

pub const NATIVE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const EMBEDDING_MODEL_FILE: &str = facegate_core::recognizer::EMBEDDING_MODEL_FILE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Pipeline configuration: defaults, then `FACEGATE_CONFIG` TOML, then `FACEGATE_*` env vars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the SeetaFace, SCRFD and embedding model files.
    pub model_dir: PathBuf,
    pub native_detector: bool,
    pub model_detector: bool,
    pub heuristic_detector: bool,
    /// Allow the synthetic centered box for best-effort detection.
    pub centered_fallback: bool,
    /// Real-time polling interval; also the per-tick detection budget.
    pub interval_ms: u64,
    pub min_quality: f32,
    pub liveness_threshold: f32,
    pub liveness_mode: LivenessMode,
    /// Minimum mean eye movement between ticks, in pixels.
    pub liveness_min_displacement: f32,
    pub match_threshold: f32,
    pub match_metric: Metric,
    /// Minimum capture image width and height for embedding extraction.
    pub min_image_size: u32,
    /// Use the trained embedding network when its model file is present.
    pub embedding_model: bool,
    pub weights: QualityWeights,
    pub skin: SkinToneConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            native_detector: true,
            model_detector: true,
            heuristic_detector: true,
            centered_fallback: true,
            interval_ms: 150,
            min_quality: 0.7,
            liveness_threshold: 0.6,
            liveness_mode: LivenessMode::Strict,
            liveness_min_displacement: DEFAULT_MIN_EYE_DISPLACEMENT,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_metric: Metric::Euclidean,
            min_image_size: 200,
            embedding_model: true,
            weights: QualityWeights::default(),
            skin: SkinToneConfig::default(),
        }
    }
}

/// `$XDG_DATA_HOME/facegate/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate/models")
}

impl Config {
    /// Load the layered configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override fields from `FACEGATE_*` variables. Unparsable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = Env(&lookup);
        if let Some(dir) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        env.bool("FACEGATE_NATIVE_DETECTOR", &mut self.native_detector);
        env.bool("FACEGATE_MODEL_DETECTOR", &mut self.model_detector);
        env.bool("FACEGATE_HEURISTIC_DETECTOR", &mut self.heuristic_detector);
        env.bool("FACEGATE_CENTERED_FALLBACK", &mut self.centered_fallback);
        env.parse("FACEGATE_INTERVAL_MS", &mut self.interval_ms);
        env.parse("FACEGATE_MIN_QUALITY", &mut self.min_quality);
        env.parse("FACEGATE_LIVENESS_THRESHOLD", &mut self.liveness_threshold);
        env.parse("FACEGATE_LIVENESS_MIN_DISPLACEMENT", &mut self.liveness_min_displacement);
        env.parse("FACEGATE_MATCH_THRESHOLD", &mut self.match_threshold);
        env.parse("FACEGATE_MATCH_METRIC", &mut self.match_metric);
        env.parse("FACEGATE_MIN_IMAGE_SIZE", &mut self.min_image_size);
        env.bool("FACEGATE_EMBEDDING_MODEL", &mut self.embedding_model);
        if let Some(mode) = lookup("FACEGATE_LIVENESS_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "strict" => self.liveness_mode = LivenessMode::Strict,
                "permissive" => self.liveness_mode = LivenessMode::Permissive,
                other => tracing::warn!(value = other, "ignoring unknown FACEGATE_LIVENESS_MODE"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.weights.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "quality weights must be non-negative and sum to 1.0 (sum = {:.4})",
                self.weights.sum()
            )));
        }
        for (name, value) in [
            ("min_quality", self.min_quality),
            ("liveness_threshold", self.liveness_threshold),
            ("match_threshold", self.match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be positive".into()));
        }
        if self.liveness_min_displacement < 0.0 {
            return Err(ConfigError::Invalid("liveness_min_displacement must be non-negative".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn native_model_path(&self) -> PathBuf {
        self.model_dir.join(NATIVE_MODEL_FILE)
    }

    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join(EMBEDDING_MODEL_FILE)
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            native_model: self.native_detector.then(|| self.native_model_path()),
            scrfd_model: self.model_detector.then(|| self.scrfd_model_path()),
            heuristic: self.heuristic_detector,
            centered: self.centered_fallback,
            budget: self.interval(),
            skin: self.skin.clone(),
            centered_box: CenteredConfig::default(),
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            threshold: self.liveness_threshold,
            mode: self.liveness_mode,
            min_eye_displacement: self.liveness_min_displacement,
        }
    }

    pub fn image_gate(&self) -> ImageGate {
        ImageGate {
            min_image_size: self.min_image_size,
            ..ImageGate::default()
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, slot: &mut T) {
        if let Some(raw) = (self.0)(key) {
            match raw.trim().parse() {
                Ok(v) => *slot = v,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
            }
        }
    }

    fn bool(&self, key: &str, slot: &mut bool) {
        if let Some(raw) = (self.0)(key) {
            *slot = !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
    }
}
