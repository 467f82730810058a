//! Runtime configuration for the Emacs daemon and client programs.
//!
//! Resolution order, lowest priority first:
//!
//! 1. Built-in defaults (`emacs`, `emacsclient` from `PATH`)
//! 2. An optional JSON file passed to [`EmacsConfig::load`]
//! 3. `ORGMACS_*` environment variables

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overrides the daemon program.
pub const EMACS_ENV: &str = "ORGMACS_EMACS";
/// Overrides the client program.
pub const EMACSCLIENT_ENV: &str = "ORGMACS_EMACSCLIENT";
/// Overrides the socket name prefix.
pub const SOCKET_PREFIX_ENV: &str = "ORGMACS_SOCKET_PREFIX";
/// Overrides the directory holding per-daemon init directories.
pub const WORK_ROOT_ENV: &str = "ORGMACS_WORK_ROOT";

/// How to launch and address the Emacs runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmacsConfig {
    /// Program started as the long-lived daemon.
    pub emacs_program: String,
    /// Arguments placed before `--fg-daemon=...`.
    pub emacs_args: Vec<String>,
    /// Program used for each evaluation.
    pub client_program: String,
    /// Arguments placed before `--socket-name=...`.
    pub client_args: Vec<String>,
    /// Socket names are `<prefix>-<pid>-<instance>`.
    pub socket_prefix: String,
    /// Parent of the temporary init directories.
    pub work_root: Option<PathBuf>,
}

impl Default for EmacsConfig {
    fn default() -> Self {
        Self {
            emacs_program: "emacs".to_string(),
            emacs_args: Vec::new(),
            client_program: "emacsclient".to_string(),
            client_args: Vec::new(),
            socket_prefix: "orgmacs".to_string(),
            work_root: None,
        }
    }
}

impl EmacsConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file, then apply environment overrides.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EmacsConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(program) = get(EMACS_ENV) {
            self.emacs_program = program;
        }
        if let Some(program) = get(EMACSCLIENT_ENV) {
            self.client_program = program;
        }
        if let Some(prefix) = get(SOCKET_PREFIX_ENV) {
            self.socket_prefix = prefix;
        }
        if let Some(root) = get(WORK_ROOT_ENV) {
            self.work_root = Some(PathBuf::from(root));
        }
        self
    }

    /// Resolve the directory that holds daemon init directories.
    ///
    /// Resolution order:
    /// 1. `work_root` if configured
    /// 2. `$XDG_RUNTIME_DIR` (per-user, Linux)
    /// 3. The system temporary directory
    pub fn work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EmacsConfig::default();
        assert_eq!(config.emacs_program, "emacs");
        assert_eq!(config.client_program, "emacsclient");
        assert_eq!(config.socket_prefix, "orgmacs");
        assert!(config.emacs_args.is_empty());
        assert!(config.work_root.is_none());
    }

    #[test]
    fn test_overrides_apply_and_skip_empty() {
        let env: HashMap<&str, &str> = [
            (EMACS_ENV, "/opt/emacs/bin/emacs"),
            (EMACSCLIENT_ENV, "  "),
            (WORK_ROOT_ENV, "/var/tmp/orgmacs"),
        ]
        .into_iter()
        .collect();

        let config =
            EmacsConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.emacs_program, "/opt/emacs/bin/emacs");
        assert_eq!(config.client_program, "emacsclient");
        assert_eq!(config.work_root(), PathBuf::from("/var/tmp/orgmacs"));
    }

    #[test]
    fn test_work_root_falls_back() {
        let config = EmacsConfig::default();
        let root = config.work_root();
        assert!(root.is_absolute(), "unexpected work root: {}", root.display());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orgmacs.json");
        std::fs::write(
            &path,
            r#"{"emacs_program": "emacs-29", "emacs_args": ["-Q"]}"#,
        )
        .unwrap();

        let config = EmacsConfig::load(&path).unwrap();
        assert_eq!(config.emacs_args, vec!["-Q".to_string()]);
        assert_eq!(config.socket_prefix, "orgmacs");
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = EmacsConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid config file"));
    }
}
