use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Longest exam allowed, grace included.
pub const MAX_EXAM_SECS: u64 = 7 * 86_400;

/// Longest time submitted sessions may be kept.
pub const MAX_RETENTION_SECS: u64 = 366 * 86_400;

/// Longest backoff between automatic resubmissions.
pub const MAX_SUBMIT_RETRY_SECS: u64 = 3_600;

/// Application configuration, loaded from a TOML file.
///
/// # Fields Overview
///
/// - `server`: where the HTTP API listens and whether it is served at all
/// - `storage`: root of the durable answer buffers and session records, plus the SQLite
///   file backing the grading store
/// - `sessions`: registry limits, retention of finished sessions, resubmission backoff and
///   suspension policy
/// - `monitoring`: how stale the supervisor projection may get
/// - `exams`: the exam catalog; each session copies its exam's duration and violation limit
///   when it is created
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use vigil::configuration::config::Config;
///
/// let config = Config::from_file(Path::new("vigil.toml")).unwrap();
/// println!("Serving on port {}", config.server.web_ui_port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub exams: Vec<ExamConfig>,
}

/// Command-line arguments of the `vigil` binary.
///
/// Only the config file is mandatory; the remaining flags override the file and can also
/// be given through the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "Proctored, timed assessment engine")]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Address the HTTP API binds to
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or `VIGIL_BIND_ADDRESS`
    #[arg(long, env = "VIGIL_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port of the HTTP API
    ///
    /// # Command Line
    /// Use `--web-ui-port <PORT>` or `VIGIL_WEB_UI_PORT`
    #[arg(long, env = "VIGIL_WEB_UI_PORT")]
    pub web_ui_port: Option<u16>,

    /// Root directory for durable session state
    ///
    /// # Command Line
    /// Use `--storage-path <PATH>` or `VIGIL_STORAGE_PATH`
    #[arg(long, env = "VIGIL_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        info!(
            "Loaded configuration with {} exam(s) from {}",
            config.exams.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies CLI / environment overrides, then re-validates.
    pub fn apply_overrides(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(ref addr) = args.bind_address {
            self.server.bind_address = addr.clone();
        }
        if let Some(port) = args.web_ui_port {
            self.server.web_ui_port = port;
        }
        if let Some(ref path) = args.storage_path {
            self.storage.path = path.clone();
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exams.is_empty() {
            return Err(ConfigError::ExamsEmpty(
                "at least one [[exams]] entry is required".to_string(),
            ));
        }

        let port = self.server.web_ui_port;
        if port != 0 && port < 1024 {
            return Err(ConfigError::BadPortsRange(format!(
                "web_ui_port {} is reserved, use 1024-65535 (or 0 for any)",
                port
            )));
        }

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.max_sessions must be at least 1".to_string(),
            ));
        }

        let retention = self.sessions.retention_secs;
        if !(1..=MAX_RETENTION_SECS).contains(&retention) {
            return Err(ConfigError::NotInRange(format!(
                "sessions.retention_secs {} not in 1-{}",
                retention, MAX_RETENTION_SECS
            )));
        }

        let retry = self.sessions.submit_retry_secs;
        if !(1..=MAX_SUBMIT_RETRY_SECS).contains(&retry) {
            return Err(ConfigError::NotInRange(format!(
                "sessions.submit_retry_secs {} not in 1-{}",
                retry, MAX_SUBMIT_RETRY_SECS
            )));
        }

        let refresh = self.monitoring.refresh_interval_secs;
        if !(1..=300).contains(&refresh) {
            return Err(ConfigError::NotInRange(format!(
                "monitoring.refresh_interval_secs {} not in 1-300",
                refresh
            )));
        }

        // ids end up as file names in the answer store
        let id_pattern = Regex::new(r"^[A-Za-z0-9_.-]+$")
            .map_err(|e| ConfigError::BadIdentifier(e.to_string()))?;
        let mut exam_ids = HashSet::new();
        for exam in &self.exams {
            if !id_pattern.is_match(&exam.id) || exam.id.starts_with('.') {
                return Err(ConfigError::BadIdentifier(format!("exam id '{}'", exam.id)));
            }
            if !exam_ids.insert(exam.id.as_str()) {
                return Err(ConfigError::DuplicateIdentifier(format!("exam '{}'", exam.id)));
            }
            if exam.duration_secs == 0 {
                return Err(ConfigError::NotInRange(format!(
                    "exam '{}' duration_secs must be positive",
                    exam.id
                )));
            }
            let limit = exam.duration_secs.saturating_add(exam.grace_secs);
            if limit > MAX_EXAM_SECS {
                return Err(ConfigError::NotInRange(format!(
                    "exam '{}' duration_secs + grace_secs {} exceeds {}",
                    exam.id, limit, MAX_EXAM_SECS
                )));
            }
            if exam.max_violations == 0 {
                return Err(ConfigError::NotInRange(format!(
                    "exam '{}' max_violations must be at least 1",
                    exam.id
                )));
            }
            let mut question_ids = HashSet::new();
            for q in &exam.questions {
                if !id_pattern.is_match(&q.id) || q.id.starts_with('.') {
                    return Err(ConfigError::BadIdentifier(format!(
                        "question id '{}' in exam '{}'",
                        q.id, exam.id
                    )));
                }
                if !question_ids.insert(q.id.as_str()) {
                    return Err(ConfigError::DuplicateIdentifier(format!(
                        "question '{}' in exam '{}'",
                        q.id, exam.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
bind_address = "0.0.0.0"
web_ui_port = 9090

[storage]
path = "/tmp/vigil-test"

[sessions]
max_sessions = 50
submit_retry_secs = 3

[[exams]]
id = "algebra-1"
title = "Algebra I"
duration_secs = 3600
max_violations = 3

[[exams.questions]]
id = "q1"
kind = "single"
options = ["a", "b", "c"]
correct = { kind = "single", value = "b" }

[[exams.questions]]
id = "q2"
kind = "text"
max_length = 500
"#;

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(SAMPLE).unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.web_ui_port, 9090);
        assert!(config.server.web_ui_enabled);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/vigil-test"));
        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/tmp/vigil-test/grading.sqlite3")
        );
        assert_eq!(config.sessions.max_sessions, 50);
        assert_eq!(config.sessions.submit_retry_secs, 3);
        assert_eq!(config.sessions.retention_secs, 86_400);
        assert_eq!(config.monitoring.refresh_interval_secs, 5);

        let exam = &config.exams[0];
        assert_eq!(exam.max_violations, 3);
        assert_eq!(exam.questions.len(), 2);
        assert_eq!(
            exam.question("q1").unwrap().correct,
            Some(crate::answers::types::AnswerValue::Single("b".into()))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.exams[0].id, "algebra-1");

        let missing = Config::from_file(Path::new("/nonexistent/vigil.toml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("vigil.toml");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.exams[0].questions.len(), 3);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let no_exams = "[server]\nweb_ui_port = 9090\n";
        assert!(matches!(
            Config::from_toml(no_exams),
            Err(ConfigError::ExamsEmpty(_))
        ));

        let bad_port = SAMPLE.replace("web_ui_port = 9090", "web_ui_port = 80");
        assert!(matches!(
            Config::from_toml(&bad_port),
            Err(ConfigError::BadPortsRange(_))
        ));

        let zero_max = SAMPLE.replace("max_violations = 3", "max_violations = 0");
        assert!(matches!(
            Config::from_toml(&zero_max),
            Err(ConfigError::NotInRange(_))
        ));

        let traversal = SAMPLE.replace("id = \"q2\"", "id = \"../q2\"");
        assert!(matches!(
            Config::from_toml(&traversal),
            Err(ConfigError::BadIdentifier(_))
        ));

        let duplicate = SAMPLE.replace("id = \"q2\"", "id = \"q1\"");
        assert!(matches!(
            Config::from_toml(&duplicate),
            Err(ConfigError::DuplicateIdentifier(_))
        ));

        assert!(matches!(
            Config::from_toml("exams = 3"),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_rejects_unbounded_durations() {
        let huge = SAMPLE.replace("duration_secs = 3600", "duration_secs = 10000000000000000");
        assert!(matches!(
            Config::from_toml(&huge),
            Err(ConfigError::NotInRange(_))
        ));

        let at_limit = SAMPLE.replace(
            "duration_secs = 3600",
            &format!("duration_secs = {}\ngrace_secs = 0", MAX_EXAM_SECS),
        );
        assert!(Config::from_toml(&at_limit).is_ok());

        let grace_over = SAMPLE.replace(
            "duration_secs = 3600",
            &format!("duration_secs = {}\ngrace_secs = 1", MAX_EXAM_SECS),
        );
        assert!(matches!(
            Config::from_toml(&grace_over),
            Err(ConfigError::NotInRange(_))
        ));

        let retention = SAMPLE.replace(
            "submit_retry_secs = 3",
            "submit_retry_secs = 3\nretention_secs = 100000000000",
        );
        assert!(matches!(
            Config::from_toml(&retention),
            Err(ConfigError::NotInRange(_))
        ));

        let retry = SAMPLE.replace("submit_retry_secs = 3", "submit_retry_secs = 0");
        assert!(matches!(
            Config::from_toml(&retry),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    #[serial]
    fn test_cli_overrides() {
        std::env::remove_var("VIGIL_WEB_UI_PORT");
        let args = CliArgs::try_parse_from([
            "vigil",
            "vigil.toml",
            "--bind-address",
            "10.0.0.1",
            "--storage-path",
            "/srv/vigil",
        ])
        .unwrap_or_else(|e| panic!("{}", e));
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.apply_overrides(&args).unwrap();

        assert_eq!(args.config_file, PathBuf::from("vigil.toml"));
        assert_eq!(config.server.bind_address, "10.0.0.1");
        assert_eq!(config.server.web_ui_port, 9090);
        assert_eq!(config.storage.path, PathBuf::from("/srv/vigil"));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("VIGIL_WEB_UI_PORT", "8181");
        let args = CliArgs::try_parse_from(["vigil", "vigil.toml"]);
        std::env::remove_var("VIGIL_WEB_UI_PORT");
        let args = args.unwrap_or_else(|e| panic!("{}", e));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.apply_overrides(&args).unwrap();
        assert_eq!(config.server.web_ui_port, 8181);
    }
}
