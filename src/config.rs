//! Configuration for Shipyard.
//!
//! Settings are read from `$SHIPYARD_HOME/config.toml` (default `~/.shipyard`),
//! with environment variables layered on top.
//!
//! ```toml
//! [agent]
//! kind = "claude-code"      # or "codex"
//! command = "claude"
//! timeout_secs = 3600
//! session_continuity = true
//!
//! [ci]
//! max_attempts = 3
//! watch_timeout_ms = 600000
//! log_max_chars = 50000
//! command_timeout_secs = 300
//!
//! [validation]
//! max_retries = 3
//!
//! [workflow]
//! push = false
//! open_pr = false
//!
//! [daemon]
//! port = 7420
//! sweep_interval_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::executor::AgentKind;

/// Directory name under the user's home when `SHIPYARD_HOME` is unset.
pub const SHIPYARD_DIR: &str = ".shipyard";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub kind: AgentKind,
    /// Executable to spawn; falls back to `CLAUDE_CMD` / `CODEX_CMD`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Resume the agent's own session between phases when it supports it.
    #[serde(default = "default_session_continuity")]
    pub session_continuity: bool,
}

fn default_agent_timeout_secs() -> u64 {
    3600
}

fn default_session_continuity() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            command: None,
            timeout_secs: default_agent_timeout_secs(),
            session_continuity: default_session_continuity(),
        }
    }
}

/// Limits for the CI watch/fix loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSection {
    #[serde(default = "default_ci_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ci_watch_timeout_ms")]
    pub watch_timeout_ms: u64,
    #[serde(default = "default_ci_log_max_chars")]
    pub log_max_chars: usize,
    /// Deadline for each `git`/`gh` invocation.
    #[serde(default = "default_ci_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_ci_max_attempts() -> u32 {
    3
}

fn default_ci_watch_timeout_ms() -> u64 {
    600_000
}

fn default_ci_log_max_chars() -> usize {
    50_000
}

fn default_ci_command_timeout_secs() -> u64 {
    300
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            max_attempts: default_ci_max_attempts(),
            watch_timeout_ms: default_ci_watch_timeout_ms(),
            log_max_chars: default_ci_log_max_chars(),
            command_timeout_secs: default_ci_command_timeout_secs(),
        }
    }
}

impl CiSection {
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    /// Consecutive schema failures tolerated before the run fails.
    #[serde(default = "default_validation_max_retries")]
    pub max_retries: u32,
}

fn default_validation_max_retries() -> u32 {
    3
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_retries: default_validation_max_retries(),
        }
    }
}

/// Defaults for new features; CLI flags override these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub open_pr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_daemon_port() -> u16 {
    7420
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipyardToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub ci: CiSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub daemon: DaemonSection,
}

impl ShipyardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `config.toml` from `home`, or defaults when it is missing.
    pub fn load_or_default(home: &Path) -> Result<Self> {
        let path = home.join("config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ci.max_attempts == 0 {
            warnings.push("ci.max_attempts is 0: failing CI will never be repaired".to_string());
        }
        if self.ci.watch_timeout_ms < 1_000 {
            warnings.push(format!(
                "ci.watch_timeout_ms {} is below one second",
                self.ci.watch_timeout_ms
            ));
        }
        if self.ci.command_timeout_secs == 0 {
            warnings.push("ci.command_timeout_secs is 0: git and gh calls time out immediately".to_string());
        }
        if self.validation.max_retries == 0 {
            warnings.push(
                "validation.max_retries is 0: the first schema violation fails the run"
                    .to_string(),
            );
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("agent.timeout_secs is 0: agent calls time out immediately".to_string());
        }
        warnings
    }
}

/// Runtime configuration: the parsed file plus resolved paths and env overrides.
#[derive(Debug, Clone)]
pub struct ShipyardConfig {
    pub home: PathBuf,
    pub toml: ShipyardToml,
}

impl ShipyardConfig {
    /// Resolve the home directory and load its config file.
    pub fn load() -> Result<Self> {
        let home = resolve_home()?;
        Self::from_home(home)
    }

    pub fn from_home(home: PathBuf) -> Result<Self> {
        let mut toml = ShipyardToml::load_or_default(&home)?;
        if let Ok(kind) = std::env::var("SHIPYARD_AGENT") {
            toml.agent.kind = kind
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid SHIPYARD_AGENT")?;
        }
        Ok(Self { home, toml })
    }

    /// Create the home directory layout if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.home.clone(), self.log_dir(), self.specs_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("shipyard.db")
    }

    pub fn daemon_state_path(&self) -> PathBuf {
        self.home.join("daemon.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.home.join("specs")
    }

    /// Agent executable for the configured kind.
    pub fn agent_command(&self) -> String {
        self.agent_command_for(self.toml.agent.kind)
    }

    /// Agent executable for `kind`: file (when `kind` is the configured one),
    /// then env, then the default binary name.
    pub fn agent_command_for(&self, kind: AgentKind) -> String {
        if kind == self.toml.agent.kind
            && let Some(cmd) = &self.toml.agent.command
        {
            return cmd.clone();
        }
        let (var, fallback) = match kind {
            AgentKind::ClaudeCode => ("CLAUDE_CMD", "claude"),
            AgentKind::Codex => ("CODEX_CMD", "codex"),
        };
        std::env::var(var).unwrap_or_else(|_| fallback.to_string())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.agent.timeout_secs)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// `SHIPYARD_HOME`, else `~/.shipyard`.
pub fn resolve_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SHIPYARD_HOME")
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(SHIPYARD_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let toml = ShipyardToml::default();
        assert_eq!(toml.ci.max_attempts, 3);
        assert_eq!(toml.ci.watch_timeout_ms, 600_000);
        assert_eq!(toml.ci.log_max_chars, 50_000);
        assert_eq!(toml.ci.command_timeout_secs, 300);
        assert_eq!(toml.validation.max_retries, 3);
        assert!(toml.agent.session_continuity);
        assert_eq!(toml.agent.kind, AgentKind::ClaudeCode);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = ShipyardToml::parse(
            r#"
            [ci]
            max_attempts = 5

            [agent]
            kind = "codex"
            "#,
        )
        .unwrap();
        assert_eq!(toml.ci.max_attempts, 5);
        assert_eq!(toml.ci.watch_timeout_ms, 600_000);
        assert_eq!(toml.agent.kind, AgentKind::Codex);
        assert_eq!(toml.validation.max_retries, 3);
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(ShipyardToml::parse("[ci\nmax_attempts = ").is_err());
    }

    #[test]
    fn test_validate_warns_on_zero_limits() {
        let mut toml = ShipyardToml::default();
        toml.ci.max_attempts = 0;
        toml.validation.max_retries = 0;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("ci.max_attempts"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut toml = ShipyardToml::default();
        toml.workflow.push = true;
        toml.daemon.port = 9000;
        toml.save(&dir.path().join("config.toml")).unwrap();

        let loaded = ShipyardToml::load_or_default(dir.path()).unwrap();
        assert!(loaded.workflow.push);
        assert_eq!(loaded.daemon.port, 9000);
    }

    #[test]
    fn test_paths_live_under_home() {
        let dir = tempdir().unwrap();
        let config = ShipyardConfig {
            home: dir.path().to_path_buf(),
            toml: ShipyardToml::default(),
        };
        config.ensure_dirs().unwrap();
        assert!(config.log_dir().is_dir());
        assert!(config.specs_dir().is_dir());
        assert_eq!(config.db_path(), dir.path().join("shipyard.db"));
        assert_eq!(config.daemon_state_path(), dir.path().join("daemon.json"));
    }

    #[test]
    fn test_explicit_agent_command_wins() {
        let mut toml = ShipyardToml::default();
        toml.agent.command = Some("/opt/bin/claude".into());
        let config = ShipyardConfig {
            home: PathBuf::from("/tmp"),
            toml,
        };
        assert_eq!(config.agent_command(), "/opt/bin/claude");
        assert_ne!(config.agent_command_for(AgentKind::Codex), "/opt/bin/claude");
    }
}
