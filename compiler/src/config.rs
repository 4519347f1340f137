// config.rs — Compiler configuration
//
// Loaded from YAML (explicit path, else plsc.yaml / plsc.yml in the working
// directory), then overridden by PLSC_* environment variables. CLI flags are
// applied on top by the binary.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::emit::EndAction;
use crate::error::{Error, Result};
use crate::params::{parse_assignment, Params};

const DEFAULT_LOCATIONS: [&str; 2] = ["plsc.yaml", "plsc.yml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compile: CompileConfig,

    #[serde(default)]
    pub emit: EmitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// An explicit path must exist; the default locations are optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match DEFAULT_LOCATIONS.iter().map(Path::new).find(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Config::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply `PLSC_*` overrides from any key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PLSC_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("PLSC_LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Some(val) = lookup("PLSC_END_ACTION") {
            self.emit.end_action = val;
        }
        if let Some(val) = lookup("PLSC_PROGRAM_LOG") {
            self.emit.program_log = (!val.is_empty()).then(|| PathBuf::from(val));
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.end_action()?;
        self.params()?;
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(Error::Config(format!(
                    "logging.format must be 'text' or 'json', got '{other}'"
                )))
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Config("logging.level cannot be empty".into()));
        }
        Ok(())
    }

    pub fn end_action(&self) -> Result<EndAction> {
        self.emit
            .end_action
            .parse()
            .map_err(|e| Error::Config(format!("emit.end_action: {e}")))
    }

    /// `compile.params`, parsed with the `--param` value syntax.
    pub fn params(&self) -> Result<Params> {
        self.compile
            .params
            .iter()
            .map(|(name, value)| {
                parse_assignment(&format!("{name}={value}"))
                    .map_err(|e| Error::Config(format!("compile.params: {e}")))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Name → value text, e.g. `tau: 300ns` or `tau: "1us:4us:4"`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitConfig {
    #[serde(default = "default_end_action")]
    pub end_action: String,

    /// Directory receiving a `program_log_<n>` listing per emitted program.
    #[serde(default)]
    pub program_log: Option<PathBuf>,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            end_action: default_end_action(),
            program_log: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_end_action() -> String {
    EndAction::default().to_string()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use std::io::Write as _;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.end_action().unwrap(), EndAction::BranchToStart);
        assert_eq!(config.logging.level, "info");
        assert!(config.emit.program_log.is_none());
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
compile:
  params:
    tau: 300ns
    N: "3"
emit:
  end_action: continue
logging:
  format: json
"#
        )
        .unwrap();
        let config = Config::from_file(f.path()).unwrap();
        assert_eq!(config.end_action().unwrap(), EndAction::Continue);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        let params = config.params().unwrap();
        assert_eq!(params.get("tau"), Some(&ParamValue::Scalar(300)));
        assert_eq!(params.get("N"), Some(&ParamValue::Scalar(3)));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(Config::load(Some(&missing)), Err(Error::Io(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            "PLSC_LOG_LEVEL" => Some("debug".into()),
            "PLSC_END_ACTION" => Some("loop:4".into()),
            "PLSC_PROGRAM_LOG" => Some("/tmp/plsc".into()),
            _ => None,
        });
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.end_action().unwrap(), EndAction::Loop(4));
        assert_eq!(config.emit.program_log, Some(PathBuf::from("/tmp/plsc")));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.emit.end_action = "jump".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.compile.params.insert("tau".into(), "5 V".into());
        assert!(config.validate().is_err());
    }
}
