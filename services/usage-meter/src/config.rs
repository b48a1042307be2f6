use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyTable;

/// What the HTTP layer answers when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Refuse the gated action (503).
    #[default]
    Closed,
    /// Let the action through uncounted and flag the response as degraded.
    Open,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail-closed" => Ok(FailurePolicy::Closed),
            "open" | "fail-open" => Ok(FailurePolicy::Open),
            other => anyhow::bail!("invalid failure policy {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("invalid store backend {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsageMeterConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    pub plan_policy_path: Option<PathBuf>,
    pub store_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    pub log_level: String,
}

impl Default for UsageMeterConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8190,
            data_dir: PathBuf::from("data/usage"),
            store_backend: StoreBackend::Sqlite,
            plan_policy_path: None,
            store_timeout_ms: 2_000,
            failure_policy: FailurePolicy::Closed,
            log_level: "info".to_string(),
        }
    }
}

impl UsageMeterConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("METER_HOST") {
            if !host.trim().is_empty() {
                cfg.server_host = host;
            }
        }
        if let Ok(port) = env::var("METER_PORT") {
            cfg.server_port = port.parse().context("METER_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("METER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(backend) = env::var("METER_STORE") {
            cfg.store_backend = backend.parse().context("METER_STORE must be sqlite or memory")?;
        }
        if let Ok(path) = env::var("PLAN_POLICY_PATH") {
            if !path.trim().is_empty() {
                cfg.plan_policy_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(timeout) = env::var("STORE_TIMEOUT_MS") {
            cfg.store_timeout_ms = timeout
                .parse()
                .context("STORE_TIMEOUT_MS must be a positive integer")?;
        }
        if let Ok(policy) = env::var("FAIL_POLICY") {
            cfg.failure_policy = policy
                .parse()
                .with_context(|| format!("FAIL_POLICY is invalid: {policy}"))?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_backend == StoreBackend::Sqlite {
            ensure_directory(&self.data_dir)?;
        }

        if self.store_timeout_ms == 0 {
            anyhow::bail!("STORE_TIMEOUT_MS must be greater than zero");
        }
        if let Some(path) = &self.plan_policy_path {
            if !path.is_file() {
                anyhow::bail!("plan policy file {} does not exist", path.display());
            }
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Loads the plan table from `PLAN_POLICY_PATH`, or the built-in tiers.
    pub fn load_policy(&self) -> Result<PolicyTable> {
        match &self.plan_policy_path {
            Some(path) => PolicyTable::from_json_file(path)
                .with_context(|| format!("loading plan policy from {}", path.display())),
            None => Ok(PolicyTable::builtin()),
        }
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_aliases() {
        assert_eq!("closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::Closed);
        assert_eq!("Fail-Open".parse::<FailurePolicy>().unwrap(), FailurePolicy::Open);
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout_and_missing_policy_file() {
        let temp = tempfile::tempdir().unwrap();
        let mut cfg = UsageMeterConfig {
            data_dir: temp.path().join("usage"),
            ..UsageMeterConfig::default()
        };
        cfg.validate().unwrap();
        assert!(cfg.data_dir.is_dir());

        cfg.store_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        cfg.store_timeout_ms = 100;
        cfg.plan_policy_path = Some(temp.path().join("missing.json"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_policy_reads_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("plans.json");
        fs::write(&path, r#"{"plans": {"starter": {"analyses": 10}}}"#).unwrap();

        let cfg = UsageMeterConfig {
            store_backend: StoreBackend::Memory,
            plan_policy_path: Some(path),
            ..UsageMeterConfig::default()
        };
        let table = cfg.load_policy().unwrap();
        assert_eq!(table.plan_names(), vec!["starter"]);
    }
}
