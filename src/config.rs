use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_scan_name")]
    pub default_scan_name: String,
    #[serde(default = "default_process_top_n")]
    pub process_top_n: usize,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_client_timeout")]
    pub timeout: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            results_dir: default_results_dir(),
            default_scan_name: default_scan_name(),
            process_top_n: default_process_top_n(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_client_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.results_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "results_dir не должен быть пустым".to_string(),
            ));
        }
        if self.default_scan_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_scan_name не должен быть пустым".to_string(),
            ));
        }
        if self.process_top_n < 1 {
            return Err(ConfigError::Validation(
                "process_top_n должно быть >= 1".to_string(),
            ));
        }

        validate_client(&self.client)?;

        Ok(())
    }

    pub fn listen_port(&self) -> u16 {
        SocketAddr::from_str(&self.listen)
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(self.timeout.trim()).map_err(|err| {
            ConfigError::Validation(format!(
                "client.timeout '{}' не является длительностью: {err}",
                self.timeout
            ))
        })
    }
}

fn validate_client(cfg: &ClientConfig) -> Result<(), ConfigError> {
    let base = cfg.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Validation(
            "client.base_url не должен быть пустым".to_string(),
        ));
    }
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "client.base_url '{base}' должен начинаться с http:// или https://"
        )));
    }
    if cfg.timeout()?.is_zero() {
        return Err(ConfigError::Validation(
            "client.timeout должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:3388".to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_scan_name() -> String {
    "device_scan".to_string()
}

const fn default_process_top_n() -> usize {
    5
}

fn default_base_url() -> String {
    "http://127.0.0.1:3388".to_string()
}

fn default_client_timeout() -> String {
    "60s".to_string()
}
