use serde::{Deserialize, Serialize};
use std::collections::HashSet;
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
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_cpu_sample_window_ms")]
    pub cpu_sample_window_ms: u64,
    #[serde(default = "default_top_sessions")]
    pub top_sessions: usize,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_app_process")]
    pub app_process: String,
    #[serde(default = "default_terminal_port")]
    pub terminal_port: u16,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_nfs_home")]
    pub nfs_home: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub process: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            refresh_interval_secs: default_refresh_interval_secs(),
            cpu_sample_window_ms: default_cpu_sample_window_ms(),
            top_sessions: default_top_sessions(),
            storage: StorageConfig::default(),
            app_process: default_app_process(),
            terminal_port: default_terminal_port(),
            services: default_services(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            data_root: default_data_root(),
            nfs_home: default_nfs_home(),
            tmp_dir: default_tmp_dir(),
        }
    }
}

impl StorageConfig {
    pub fn targets(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("tmp", self.tmp_dir.clone()),
            ("nfs_home", self.nfs_home.clone()),
            ("projects", self.projects_root.clone()),
            ("data", self.data_root.clone()),
        ]
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} in environment variable {var}")]
    Env { var: &'static str, value: String },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    // Defaults, then the optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env(|var| std::env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("R_PROJECTS_ROOT") {
            self.storage.projects_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATA_ROOT") {
            self.storage.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("NFS_HOME") {
            self.storage.nfs_home = PathBuf::from(v);
        }
        if let Some(v) = lookup("TELEMETRY_TMP_DIR") {
            self.storage.tmp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TELEMETRY_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("TELEMETRY_REFRESH_SEC") {
            self.refresh_interval_secs = parse_env("TELEMETRY_REFRESH_SEC", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_CPU_WINDOW_MS") {
            self.cpu_sample_window_ms = parse_env("TELEMETRY_CPU_WINDOW_MS", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_TOP_SESSIONS") {
            self.top_sessions = parse_env("TELEMETRY_TOP_SESSIONS", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_APP_PROCESS") {
            self.app_process = v;
        }
        if let Some(v) = lookup("TELEMETRY_TERMINAL_PORT") {
            self.terminal_port = parse_env("TELEMETRY_TERMINAL_PORT", v)?;
        }

        let aux_name = lookup("TELEMETRY_AUX_SERVICE");
        let aux_port = match lookup("TELEMETRY_AUX_PORT") {
            Some(v) => Some(parse_env::<u16>("TELEMETRY_AUX_PORT", v)?),
            None => None,
        };
        if aux_name.is_some() || aux_port.is_some() {
            if self.services.is_empty() {
                self.services = default_services();
            }
            let primary = &mut self.services[0];
            if let Some(name) = aux_name {
                primary.process = name.clone();
                primary.name = name;
            }
            if let Some(port) = aux_port {
                primary.port = port;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.refresh_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "refresh_interval_secs must be >= 1".to_string(),
            ));
        }
        if self.cpu_sample_window() >= self.refresh_interval() {
            return Err(ConfigError::Validation(
                "cpu_sample_window_ms must be shorter than the refresh interval".to_string(),
            ));
        }
        if self.top_sessions < 1 {
            return Err(ConfigError::Validation(
                "top_sessions must be >= 1".to_string(),
            ));
        }
        if self.app_process.trim().is_empty() {
            return Err(ConfigError::Validation(
                "app_process must not be empty".to_string(),
            ));
        }
        if self.terminal_port == 0 {
            return Err(ConfigError::Validation(
                "terminal_port must be in range 1..65535".to_string(),
            ));
        }

        validate_services(&self.services)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_window_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_services(services: &[ServiceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for svc in services {
        if svc.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(svc.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "service name '{}' must be unique",
                svc.name
            )));
        }
        if svc.process.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "service '{}' process must not be empty",
                svc.name
            )));
        }
        if svc.port == 0 {
            return Err(ConfigError::Validation(format!(
                "service '{}' port must be in range 1..65535",
                svc.name
            )));
        }
    }
    Ok(())
}

fn parse_env<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

const fn default_refresh_interval_secs() -> u64 {
    5
}

const fn default_cpu_sample_window_ms() -> u64 {
    500
}

const fn default_top_sessions() -> usize {
    5
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("/media/r_projects")
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/media/data")
}

fn default_nfs_home() -> PathBuf {
    PathBuf::from("/nfs/home")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_app_process() -> String {
    "rsession".to_string()
}

const fn default_terminal_port() -> u16 {
    7681
}

fn default_services() -> Vec<ServiceConfig> {
    vec![ServiceConfig {
        name: "ollama".to_string(),
        process: "ollama".to_string(),
        port: 11434,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(5));
        assert_eq!(cfg.storage.targets().len(), 4);
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("refresh_interval_secs: 10\n").unwrap();
        assert_eq!(cfg.refresh_interval_secs, 10);
        assert_eq!(cfg.terminal_port, 7681);
        assert_eq!(cfg.storage.tmp_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("R_PROJECTS_ROOT", "/srv/projects"),
            ("TELEMETRY_REFRESH_SEC", "15"),
            ("TELEMETRY_TOP_SESSIONS", "3"),
            ("TELEMETRY_AUX_PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(cfg.storage.projects_root, PathBuf::from("/srv/projects"));
        assert_eq!(cfg.refresh_interval_secs, 15);
        assert_eq!(cfg.top_sessions, 3);
        assert_eq!(cfg.services[0].name, "ollama");
        assert_eq!(cfg.services[0].port, 9000);
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env(&[("TELEMETRY_REFRESH_SEC", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "TELEMETRY_REFRESH_SEC",
                ..
            }
        ));
    }

    #[test]
    fn window_must_fit_in_interval() {
        let cfg = Config {
            refresh_interval_secs: 1,
            cpu_sample_window_ms: 1_000,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn duplicate_service_names_rejected() {
        let mut cfg = Config::default();
        cfg.services.push(cfg.services[0].clone());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
