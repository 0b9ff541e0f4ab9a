//! Configuration for workcopy-sync.
//!
//! Loaded once by the binary from a TOML file plus a few environment
//! overrides, then passed down explicitly. Library components never read
//! the environment themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "WORKCOPY_SYNC_CONFIG";

/// Environment variable overriding the sandboxes directory.
pub const HOME_ENV: &str = "WORKCOPY_SYNC_HOME";

/// Environment variable overriding the git timeout, in seconds.
pub const GIT_TIMEOUT_ENV: &str = "WORKCOPY_SYNC_GIT_TIMEOUT";

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one subdirectory per sandbox.
    #[serde(default = "default_sandboxes_dir")]
    pub sandboxes_dir: PathBuf,

    /// Git executable to invoke.
    #[serde(default = "default_git_program")]
    pub git_program: String,

    /// Deadline for a single git invocation.
    #[serde(default = "default_git_timeout", with = "duration_secs")]
    pub git_timeout: Duration,
}

fn default_sandboxes_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".workcopy-sync")
        .join("sandboxes")
}

fn default_git_program() -> String {
    "git".to_string()
}

fn default_git_timeout() -> Duration {
    Duration::from_secs(300)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandboxes_dir: default_sandboxes_dir(),
            git_program: default_git_program(),
            git_timeout: default_git_timeout(),
        }
    }
}

impl Config {
    /// Creates a configuration rooted at the given sandboxes directory.
    pub fn with_sandboxes_dir(sandboxes_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandboxes_dir: sandboxes_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the git timeout.
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Reads a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Loads the configuration for this process.
    ///
    /// An explicit path wins, then `WORKCOPY_SYNC_CONFIG`, then
    /// `$HOME/.workcopy-sync/config.toml` when it exists, then defaults.
    /// Environment overrides are applied last and the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let default_file = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".workcopy-sync").join("config.toml"));

        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => match default_file.filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_overrides(
            std::env::var(HOME_ENV).ok().as_deref(),
            std::env::var(GIT_TIMEOUT_ENV).ok().as_deref(),
        )?;

        let warnings = config.validate().into_result()?;
        for warning in warnings {
            tracing::warn!(%warning, "configuration warning");
        }

        Ok(config)
    }

    /// Applies override values as read from the environment.
    pub fn apply_overrides(&mut self, home: Option<&str>, git_timeout: Option<&str>) -> Result<()> {
        if let Some(home) = home.filter(|h| !h.trim().is_empty()) {
            self.sandboxes_dir = PathBuf::from(home);
        }
        if let Some(secs) = git_timeout {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a number of seconds, got '{}'", GIT_TIMEOUT_ENV, secs))
            })?;
            self.git_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.git_program.trim().is_empty() {
            result.add_error("git_program cannot be empty");
        }

        if self.git_timeout.is_zero() {
            result.add_error("git_timeout must be greater than zero");
        }

        if self.git_timeout > Duration::from_secs(3600) {
            result.add_warning("git_timeout over 1 hour may hide a hung git process");
        }

        if self.sandboxes_dir.as_os_str().is_empty() {
            result.add_error("sandboxes_dir cannot be empty");
        } else if self.sandboxes_dir.is_relative() {
            result.add_warning("sandboxes_dir is relative and depends on the working directory");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.git_program, "git");
        assert_eq!(config.git_timeout, Duration::from_secs(300));
        assert!(config.sandboxes_dir.ends_with("sandboxes"));
    }

    #[test]
    fn toml_fields_override_defaults() {
        let config = Config::from_toml(
            r#"
sandboxes_dir = "/srv/sandboxes"
git_program = "/usr/local/bin/git"
git_timeout = 42
"#,
        )
        .unwrap();
        assert_eq!(config.sandboxes_dir, PathBuf::from("/srv/sandboxes"));
        assert_eq!(config.git_program, "/usr/local/bin/git");
        assert_eq!(config.git_timeout, Duration::from_secs(42));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = Config::from_toml("git_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_replace_home_and_timeout() {
        let mut config = Config::default();
        config.apply_overrides(Some("/tmp/elsewhere"), Some("7")).unwrap();
        assert_eq!(config.sandboxes_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.git_timeout, Duration::from_secs(7));
    }

    #[test]
    fn non_numeric_timeout_override_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_overrides(None, Some("forever")).unwrap_err();
        assert!(err.to_string().contains(GIT_TIMEOUT_ENV));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let config = Config::with_sandboxes_dir("/srv/s").with_git_timeout(Duration::ZERO);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("git_timeout")));
    }

    #[test]
    fn long_timeout_and_relative_dir_only_warn() {
        let config =
            Config::with_sandboxes_dir("relative/dir").with_git_timeout(Duration::from_secs(7200));
        let result = config.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 2);
    }
}
