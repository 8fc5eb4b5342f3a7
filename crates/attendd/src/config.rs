use attend_core::{EnhanceConfig, PipelineConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_STREAM_PORT: u16 = 5001;
pub const DEFAULT_LABEL_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One camera pipeline: where frames come from and where they are served.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// Name used in logs and the health endpoint.
    pub id: String,
    /// Snapshot URL returning one JPEG per request.
    pub source: String,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    /// Numeric camera id known to the backend, sent with every event.
    #[serde(default)]
    pub backend_id: Option<i64>,
}

fn default_stream_port() -> u16 {
    DEFAULT_STREAM_PORT
}

/// Daemon configuration: TOML file, then `ATTEND_*` environment, then CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub model_url: String,
    pub cache_path: PathBuf,
    /// Seconds between successful roster reloads.
    pub roster_reload_secs: u64,
    /// Seconds before retrying a failed roster reload.
    pub roster_retry_secs: u64,
    /// Run recognition on every n-th frame only.
    pub frame_skip: u64,
    pub bind_host: String,
    /// TrueType font for track labels on the live stream. Boxes only when unreadable.
    pub label_font: PathBuf,
    pub debug: bool,
    pub pipeline: PipelineConfig,
    pub enhance: EnhanceConfig,
    pub cameras: Vec<CameraConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            model_url: "http://localhost:8000".to_string(),
            cache_path: default_data_dir().join("embeddings.json"),
            roster_reload_secs: 300,
            roster_retry_secs: 30,
            frame_skip: 3,
            bind_host: "0.0.0.0".to_string(),
            label_font: PathBuf::from(DEFAULT_LABEL_FONT),
            debug: false,
            pipeline: PipelineConfig::default(),
            enhance: EnhanceConfig::default(),
            cameras: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub camera_id: Option<String>,
    pub camera_source: Option<String>,
    pub backend_url: Option<String>,
    pub debug: bool,
}

impl Config {
    /// Load the full configuration from the real process environment.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_with(overrides, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an injectable environment lookup.
    pub fn load_with(
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = overrides
            .config_path
            .clone()
            .or_else(|| env("ATTEND_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(&env);
        config.apply_overrides(overrides, &env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ATTEND_BACKEND_URL") {
            self.backend_url = v;
        }
        if let Some(v) = env("ATTEND_MODEL_URL") {
            self.model_url = v;
        }
        if let Some(v) = env("ATTEND_CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Some(v) = env("ATTEND_BIND_HOST") {
            self.bind_host = v;
        }
        if let Some(v) = env("ATTEND_LABEL_FONT") {
            self.label_font = PathBuf::from(v);
        }
        self.roster_reload_secs = env_parse(env, "ATTEND_RELOAD_INTERVAL", self.roster_reload_secs);
        self.frame_skip = env_parse(env, "ATTEND_FRAME_SKIP", self.frame_skip);
        self.debug = env_bool(env, "ATTEND_DEBUG", self.debug);

        let p = &mut self.pipeline;
        p.min_face_height = env_parse(env, "ATTEND_MIN_FACE_HEIGHT", p.min_face_height);
        p.min_blur_variance = env_parse(env, "ATTEND_MIN_BLUR_VAR", p.min_blur_variance);
        p.iou_threshold = env_parse(env, "ATTEND_IOU_THRESHOLD", p.iou_threshold);
        p.min_embeddings_per_track =
            env_parse(env, "ATTEND_MIN_EMBEDDINGS", p.min_embeddings_per_track);
        p.track_max_age_secs = env_parse(env, "ATTEND_TRACK_MAX_AGE", p.track_max_age_secs);
        p.match_threshold = env_parse(env, "ATTEND_MATCH_THRESHOLD", p.match_threshold);
        p.in_threshold_secs = env_parse(env, "ATTEND_IN_THRESHOLD", p.in_threshold_secs);
        p.out_threshold_secs = env_parse(env, "ATTEND_OUT_THRESHOLD", p.out_threshold_secs);

        let e = &mut self.enhance;
        e.enabled = env_bool(env, "ATTEND_ENABLE_PREPROCESSING", e.enabled);
        e.clahe_clip_limit = env_parse(env, "ATTEND_CLAHE_CLIP", e.clahe_clip_limit);
        e.denoise_strength = env_parse(env, "ATTEND_DENOISE_STRENGTH", e.denoise_strength);
    }

    fn apply_overrides(
        &mut self,
        overrides: &Overrides,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = &overrides.backend_url {
            self.backend_url = url.clone();
        }
        if overrides.debug {
            self.debug = true;
        }

        if self.cameras.is_empty() {
            self.cameras.push(CameraConfig {
                id: env("ATTEND_CAMERA_ID").unwrap_or_else(|| "camera-1".to_string()),
                source: env("ATTEND_CAMERA_SOURCE")
                    .unwrap_or_else(|| "http://localhost:8080/snapshot.jpg".to_string()),
                stream_port: env_parse(env, "ATTEND_VIDEO_PORT", DEFAULT_STREAM_PORT),
                backend_id: env("ATTEND_CAMERA_BACKEND_ID").and_then(|v| v.parse().ok()),
            });
        }

        if overrides.camera_id.is_some() || overrides.camera_source.is_some() {
            let [camera] = self.cameras.as_mut_slice() else {
                return Err(ConfigError::Invalid(
                    "--camera-id/--camera-source need exactly one configured camera".into(),
                ));
            };
            if let Some(id) = &overrides.camera_id {
                camera.id = id.clone();
            }
            if let Some(source) = &overrides.camera_source {
                camera.source = source.clone();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate().map_err(ConfigError::Invalid)?;
        if self.frame_skip == 0 {
            return Err(ConfigError::Invalid("frame_skip must be at least 1".into()));
        }
        if self.roster_reload_secs == 0 || self.roster_retry_secs == 0 {
            return Err(ConfigError::Invalid(
                "roster reload intervals must be at least 1 second".into(),
            ));
        }
        if !self.enhance.clahe_clip_limit.is_finite() || self.enhance.clahe_clip_limit <= 0.0 {
            return Err(ConfigError::Invalid("clahe_clip_limit must be positive".into()));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for camera in &self.cameras {
            if camera.id.is_empty() {
                return Err(ConfigError::Invalid("camera id must not be empty".into()));
            }
            if !ids.insert(camera.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate camera id {}", camera.id)));
            }
            if !ports.insert(camera.stream_port) {
                return Err(ConfigError::Invalid(format!(
                    "stream port {} used by more than one camera",
                    camera.stream_port
                )));
            }
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    env(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_build_single_camera() {
        let config = Config::load_with(&Overrides::default(), env_of(&[])).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].stream_port, 5001);
        assert_eq!(config.frame_skip, 3);
        assert_eq!(config.roster_reload_secs, 300);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.label_font, PathBuf::from(DEFAULT_LABEL_FONT));
    }

    #[test]
    fn test_env_overrides_label_font() {
        let env = env_of(&[("ATTEND_LABEL_FONT", "/opt/fonts/Mono.ttf")]);
        let config = Config::load_with(&Overrides::default(), env).unwrap();
        assert_eq!(config.label_font, PathBuf::from("/opt/fonts/Mono.ttf"));
    }

    #[test]
    fn test_env_overrides_thresholds() {
        let env = env_of(&[
            ("ATTEND_MIN_FACE_HEIGHT", "40"),
            ("ATTEND_OUT_THRESHOLD", "30.5"),
            ("ATTEND_FRAME_SKIP", "5"),
            ("ATTEND_DEBUG", "true"),
            ("ATTEND_ENABLE_PREPROCESSING", "false"),
            ("ATTEND_CAMERA_ID", "lobby"),
            ("ATTEND_VIDEO_PORT", "6000"),
        ]);
        let config = Config::load_with(&Overrides::default(), env).unwrap();
        assert_eq!(config.pipeline.min_face_height, 40.0);
        assert!((config.pipeline.out_threshold_secs - 30.5).abs() < 1e-9);
        assert_eq!(config.frame_skip, 5);
        assert!(config.debug);
        assert!(!config.enhance.enabled);
        assert_eq!(config.cameras[0].id, "lobby");
        assert_eq!(config.cameras[0].stream_port, 6000);
    }

    #[test]
    fn test_unparseable_env_keeps_default() {
        let env = env_of(&[("ATTEND_IOU_THRESHOLD", "lots")]);
        let config = Config::load_with(&Overrides::default(), env).unwrap();
        assert!((config.pipeline.iou_threshold - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_toml_file_with_cameras() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attend.toml");
        std::fs::write(
            &path,
            r#"
backend_url = "http://backend:3000"
frame_skip = 2

[pipeline]
match_threshold = 0.35

[[cameras]]
id = "front"
source = "http://cam-a/snapshot.jpg"
stream_port = 5001
backend_id = 1

[[cameras]]
id = "back"
source = "http://cam-b/snapshot.jpg"
stream_port = 5002
"#,
        )
        .unwrap();

        let overrides = Overrides {
            config_path: Some(path),
            ..Overrides::default()
        };
        let config = Config::load_with(&overrides, env_of(&[])).unwrap();
        assert_eq!(config.backend_url, "http://backend:3000");
        assert_eq!(config.frame_skip, 2);
        assert!((config.pipeline.match_threshold - 0.35).abs() < 1e-6);
        assert_eq!(config.pipeline.min_embeddings_per_track, 2);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].backend_id, Some(1));
        assert_eq!(config.cameras[1].backend_id, None);
    }

    #[test]
    fn test_cli_beats_env() {
        let env = env_of(&[
            ("ATTEND_BACKEND_URL", "http://env:1"),
            ("ATTEND_CAMERA_SOURCE", "http://env-cam"),
        ]);
        let overrides = Overrides {
            backend_url: Some("http://cli:2".into()),
            camera_source: Some("http://cli-cam".into()),
            debug: true,
            ..Overrides::default()
        };
        let config = Config::load_with(&overrides, env).unwrap();
        assert_eq!(config.backend_url, "http://cli:2");
        assert_eq!(config.cameras[0].source, "http://cli-cam");
        assert!(config.debug);
    }

    #[test]
    fn test_config_path_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "model_url = \"http://model:9\"\n").unwrap();
        let env = env_of(&[("ATTEND_CONFIG", path.to_str().unwrap())]);
        let config = Config::load_with(&Overrides::default(), env).unwrap();
        assert_eq!(config.model_url, "http://model:9");
    }

    #[test]
    fn test_missing_file_is_error() {
        let overrides = Overrides {
            config_path: Some(PathBuf::from("/nonexistent/attend.toml")),
            ..Overrides::default()
        };
        let err = Config::load_with(&overrides, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    fn two_cameras(a: (&str, u16), b: (&str, u16)) -> Config {
        let camera = |(id, port): (&str, u16)| CameraConfig {
            id: id.into(),
            source: "http://cam".into(),
            stream_port: port,
            backend_id: None,
        };
        Config {
            cameras: vec![camera(a), camera(b)],
            ..Config::default()
        }
    }

    #[test]
    fn test_duplicate_camera_id_rejected() {
        let config = two_cameras(("a", 5001), ("a", 5002));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let config = two_cameras(("a", 5001), ("b", 5001));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_frame_skip_rejected() {
        let config = Config {
            frame_skip: 0,
            ..two_cameras(("a", 5001), ("b", 5002))
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_camera_override_needs_single_camera() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(
            &path,
            "[[cameras]]\nid = \"a\"\nsource = \"x\"\nstream_port = 1\n[[cameras]]\nid = \"b\"\nsource = \"y\"\nstream_port = 2\n",
        )
        .unwrap();
        let overrides = Overrides {
            config_path: Some(path),
            camera_id: Some("c".into()),
            ..Overrides::default()
        };
        assert!(Config::load_with(&overrides, env_of(&[])).is_err());
    }
}
