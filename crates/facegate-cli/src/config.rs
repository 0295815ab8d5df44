use anyhow::{Context, Result};
use facegate_core::{PipelineSettings, QualityThresholds, ReferenceSourceKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "facegate.toml";

/// CLI configuration, loaded from a TOML file and `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory accepted enrollment samples are written to.
    pub enroll_dir: PathBuf,
    /// Directory of reference photos for the static reference source.
    pub reference_dir: PathBuf,
    /// Directory the trained model is persisted in.
    pub models_dir: PathBuf,
    /// Which data backs verification.
    pub reference_source: ReferenceSourceKind,
    /// Distance threshold used when `verify` is given none.
    pub default_threshold: f32,
    pub quality: QualityThresholds,
    /// Unix socket of the embedding service.
    pub extractor_socket: PathBuf,
    /// Read/write timeout for a single extractor call.
    pub extractor_timeout_secs: u64,
    /// Upper bound on one enroll/train/verify/analyze request.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let settings = PipelineSettings::default();
        Self {
            enroll_dir: settings.enroll_dir,
            reference_dir: settings.reference_dir,
            models_dir: settings.models_dir,
            reference_source: settings.reference_source,
            default_threshold: 0.5,
            quality: settings.quality,
            extractor_socket: PathBuf::from("/run/facegate/embedder.sock"),
            extractor_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load `FACEGATE_CONFIG` (or `facegate.toml`), then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("FACEGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `FACEGATE_*` variables. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FACEGATE_ENROLL_DIR") {
            self.enroll_dir = dir.into();
        }
        if let Some(dir) = var("FACEGATE_REFERENCE_DIR") {
            self.reference_dir = dir.into();
        }
        if let Some(dir) = var("FACEGATE_MODELS_DIR") {
            self.models_dir = dir.into();
        }
        match var("FACEGATE_REFERENCE_SOURCE").as_deref() {
            Some("static_directory") => {
                self.reference_source = ReferenceSourceKind::StaticDirectory;
            }
            Some("trained_model") => {
                self.reference_source = ReferenceSourceKind::TrainedModel;
            }
            Some(other) => {
                tracing::warn!(value = other, "ignoring unknown FACEGATE_REFERENCE_SOURCE");
            }
            None => {}
        }
        if let Some(socket) = var("FACEGATE_EXTRACTOR_SOCKET") {
            self.extractor_socket = socket.into();
        }

        self.default_threshold = parsed(&var, "FACEGATE_DEFAULT_THRESHOLD", self.default_threshold);
        self.extractor_timeout_secs =
            parsed(&var, "FACEGATE_EXTRACTOR_TIMEOUT_SECS", self.extractor_timeout_secs);
        self.request_timeout_secs =
            parsed(&var, "FACEGATE_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);

        let q = &mut self.quality;
        q.min_brightness = parsed(&var, "FACEGATE_MIN_BRIGHTNESS", q.min_brightness);
        q.max_brightness = parsed(&var, "FACEGATE_MAX_BRIGHTNESS", q.max_brightness);
        q.min_blur_score = parsed(&var, "FACEGATE_MIN_BLUR_SCORE", q.min_blur_score);
        q.min_face_ratio = parsed(&var, "FACEGATE_MIN_FACE_RATIO", q.min_face_ratio);
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            enroll_dir: self.enroll_dir.clone(),
            reference_dir: self.reference_dir.clone(),
            models_dir: self.models_dir.clone(),
            reference_source: self.reference_source,
            quality: self.quality,
        }
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(current)
}
