//! Configuration loader and validator for the grants and fundraising site.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub site: Site,
    pub mail: Mail,
    #[serde(default)]
    pub cron: Cron,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub bind: String,
}

/// Public site settings used in emails and pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub base_url: String,
    pub support_email: String,
}

/// Sender addresses and the HTTP relay that delivers mail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    pub fund_from: String,
    pub grants_from: String,
    /// Empty disables delivery; messages are only logged.
    #[serde(default)]
    pub relay_url: String,
    #[serde(default)]
    pub relay_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cron {
    /// Required in the `X-Cron-Secret` header when non-empty.
    #[serde(default)]
    pub secret: String,
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and its `files/` store).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.files_dir())
    }

    pub fn files_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("files")
    }

    /// Absolute link on the public site for `path` (which may start with `/`).
    pub fn site_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.site.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.bind must be host:port"));
    }

    if cfg.site.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("site.base_url must be non-empty"));
    }
    if !cfg.site.support_email.contains('@') {
        return Err(ConfigError::Invalid("site.support_email must be an email address"));
    }

    if cfg.mail.fund_from.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.fund_from must be non-empty"));
    }
    if cfg.mail.grants_from.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.grants_from must be non-empty"));
    }
    if !cfg.mail.relay_url.trim().is_empty() && reqwest::Url::parse(&cfg.mail.relay_url).is_err() {
        return Err(ConfigError::Invalid("mail.relay_url must be a valid URL"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  bind: "127.0.0.1:8080"

site:
  base_url: "https://sjf-nw.appspot.com/"
  support_email: "techsupport@socialjusticefund.org"

mail:
  fund_from: "Project Central <projectcentral@socialjusticefund.org>"
  grants_from: "Social Justice Fund Grants <grants@socialjusticefund.org>"
  relay_url: ""
  relay_token: ""

cron:
  secret: ""
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.cron.secret.is_empty());
    }

    #[test]
    fn invalid_bind() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.bind = "localhost".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app.bind")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_senders() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mail.fund_from = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("fund_from")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mail.grants_from = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mail.relay_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_site() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.support_email = "nobody".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.base_url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn site_url_joins_paths() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(cfg.site_url("/fund/login"), "https://sjf-nw.appspot.com/fund/login");
        assert_eq!(cfg.site_url("apply/"), "https://sjf-nw.appspot.com/apply/");
    }

    #[test]
    fn ensure_dirs_creates_file_store() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.join("files").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.poll_interval_ms, 500);
        assert!(cfg.mail.fund_from.starts_with("Project Central"));
    }
}
