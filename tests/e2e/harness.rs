#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, error, info};

const METER_PACKAGE: &str = "investforge-usage-meter";

#[derive(Debug)]
pub struct MeterProcess {
    pub child: Child,
    pub port: u16,
}

/// Runs the usage-meter binary against a private data directory.
pub struct TestHarness {
    workspace_dir: PathBuf,
    data_root: TempDir,
    env: HashMap<String, String>,
    process: Option<MeterProcess>,
    http_client: Client,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let workspace_dir =
            PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
        let data_root = TempDir::new().context("creating harness root tempdir")?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building reqwest client")?;

        let mut env = HashMap::new();
        env.insert(
            "RUST_LOG".to_string(),
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        );
        env.insert(
            "METER_DATA_DIR".to_string(),
            data_root.path().join("usage").display().to_string(),
        );

        Ok(Self {
            workspace_dir,
            data_root,
            env,
            process: None,
            http_client,
        })
    }

    pub fn data_root(&self) -> &Path {
        self.data_root.path()
    }

    pub fn set_env(&mut self, key: &str, value: impl Into<String>) {
        self.env.insert(key.to_string(), value.into());
    }

    /// Writes a plan policy file and points the service at it.
    pub fn use_policy(&mut self, policy: &Value) -> Result<PathBuf> {
        let path = self.data_root.path().join("plans.json");
        std::fs::write(&path, policy.to_string()).context("writing plan policy")?;
        self.set_env("PLAN_POLICY_PATH", path.display().to_string());
        Ok(path)
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn base_url(&self) -> Result<String> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| anyhow!("usage-meter is not running"))?;
        Ok(format!("http://127.0.0.1:{}", process.port))
    }

    pub async fn start(&mut self) -> Result<()> {
        tracing_subscriber::fmt::try_init().ok();
        if self.process.is_some() {
            return Ok(());
        }

        let port = find_free_port()?;
        info!(port, "starting usage-meter service");
        let mut command = Command::new("cargo");
        command
            .current_dir(&self.workspace_dir)
            .arg("run")
            .arg("--quiet")
            .arg("--package")
            .arg(METER_PACKAGE)
            .env("METER_PORT", port.to_string())
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.spawn().context("spawning usage-meter service")?;
        self.process = Some(MeterProcess { child, port });

        let health_url = format!("{}/health", self.base_url()?);
        self.wait_for_health(&health_url, Duration::from_secs(60))
            .await
            .context("waiting for usage-meter health")?;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut process) = self.process.take() {
            info!("stopping usage-meter service");
            if let Err(err) = process.child.start_kill() {
                error!("failed to send kill to usage-meter: {err:#}");
            }
            if let Err(err) = process.child.wait().await {
                error!("failed to await usage-meter shutdown: {err:#}");
            }
        }
        Ok(())
    }

    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn wait_for_health(&self, url: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.http_client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!("health check for {url} returned {}", response.status());
                }
                Err(err) => {
                    debug!("health check for {url} failed: {err}");
                }
            };
            sleep(Duration::from_millis(250)).await;
        }
        Err(anyhow!("timeout waiting for service health at {url}"))
    }

    pub async fn consume(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}/api/usage/consume", self.base_url()?);
        let response = self
            .http_client
            .post(url)
            .json(&json!({ "user_id": user_id, "feature": feature, "plan": plan }))
            .send()
            .await
            .context("posting consume request")?;
        let status = response.status();
        let body = response.json().await.context("decoding consume response")?;
        Ok((status, body))
    }

    pub async fn get_json(&self, path: &str) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url()?, path);
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = response.status();
        let body = response.json().await.context("decoding response body")?;
        Ok((status, body))
    }
}

pub fn random_user_id(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(10_000..99_999);
    format!("{prefix}-{suffix}-{}", uuid::Uuid::new_v4().simple())
}

fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("binding ephemeral port")?;
    Ok(listener.local_addr()?.port())
}
