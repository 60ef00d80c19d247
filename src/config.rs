use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub database: DatabaseConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub backend: CameraBackend,
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u64,
    #[serde(default)]
    pub read_retry: RetryConfig,
}

fn default_stream_fps() -> u64 {
    30
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.stream_fps)
    }
}

/// Capture API preference handed to OpenCV when opening the device.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    Any,
    Dshow,
    V4l2,
    Msmf,
    Avfoundation,
    Gstreamer,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum RetryConfig {
    Fixed {
        #[serde(default = "default_retry_delay_ms")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(default = "default_retry_delay_ms")]
        initial_delay_ms: u64,
        #[serde(default = "default_backoff_factor")]
        backoff_factor: u32,
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,
        max_retries: Option<u32>,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Fixed {
            delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub target_class: i64,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
}

fn default_confidence_threshold() -> f32 {
    0.7
}

fn default_min_probability() -> f32 {
    0.25
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: u64,
}

fn default_log_interval_secs() -> u64 {
    5
}

impl DatabaseConfig {
    pub fn get_log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("HC")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    const BASE: &str = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 5000
camera:
  index: 1
  backend: dshow
model:
  model_dir: model
  onnx_file: final_best.onnx
database:
  path: cctv_detections.db
"#;

    fn parse(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = parse(BASE);

        assert_eq!(config.camera.index, 1);
        assert_eq!(config.camera.backend, CameraBackend::Dshow);
        assert_eq!(config.camera.stream_fps, 30);
        assert_eq!(config.camera.read_retry, RetryConfig::Fixed { delay_ms: 100 });
        assert_eq!(config.model.confidence_threshold, 0.7);
        assert_eq!(config.model.target_class, 0);
        assert_eq!(config.database.get_log_interval(), Duration::from_secs(5));
        assert_eq!(config.server.get_address(), "127.0.0.1:5000");
    }

    #[test]
    fn test_exponential_retry_policy() {
        let yaml = BASE.replace(
            "  backend: dshow\n",
            "  backend: v4l2\n  read_retry:\n    policy: exponential\n    max_retries: 8\n",
        );
        let config = parse(&yaml);

        assert_eq!(config.camera.backend, CameraBackend::V4l2);

        assert_eq!(
            config.camera.read_retry,
            RetryConfig::Exponential {
                initial_delay_ms: 100,
                backoff_factor: 2,
                max_delay_ms: 5_000,
                max_retries: Some(8),
            }
        );
    }

    #[test]
    fn test_stream_delay() {
        let mut config = parse(BASE);
        assert_eq!(config.camera.get_stream_delay_ms(), 33);
        config.camera.stream_fps = 0;
        assert_eq!(config.camera.get_stream_delay_ms(), 1000);
    }

    #[test]
    fn test_log_level_parsing() {
        assert!(matches!(LogLevel::try_from("DEBUG".to_string()), Ok(LogLevel::Debug)));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }
}
