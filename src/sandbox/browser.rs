//! Headless-browser execution backend.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxSettings;
use crate::error::{PreviewError, Result};

/// One isolated place to run a document.
pub trait ExecutionContext: Send {
    /// Load `html`, let it run, and return the resulting DOM.
    fn load(&mut self, html: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Creates a fresh context for every mount.
pub trait ContextFactory {
    type Context: ExecutionContext;

    fn create(&self) -> Result<Self::Context>;
}

/// Launches a Chromium-family browser per load.
#[derive(Debug, Clone)]
pub struct BrowserFactory {
    settings: SandboxSettings,
}

impl BrowserFactory {
    #[must_use]
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }
}

impl ContextFactory for BrowserFactory {
    type Context = BrowserContext;

    fn create(&self) -> Result<BrowserContext> {
        let profile = TempDir::with_prefix("livepreview-profile-")?;
        Ok(BrowserContext {
            settings: self.settings.clone(),
            profile,
        })
    }
}

/// A browser run confined to a throwaway profile directory.
///
/// The profile is deleted on drop, and a browser still running when its load
/// future is dropped is killed.
#[derive(Debug)]
pub struct BrowserContext {
    settings: SandboxSettings,
    profile: TempDir,
}

impl BrowserContext {
    fn document_path(&self) -> PathBuf {
        self.profile.path().join("preview.html")
    }

    fn command(&self, document: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.settings.browser);
        cmd.arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-data-dir={}", self.profile.path().display()))
            .arg(format!(
                "--virtual-time-budget={}",
                self.settings.render_budget_ms
            ))
            .args(&self.settings.extra_args)
            .arg("--dump-dom")
            .arg(format!("file://{}", document.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl ExecutionContext for BrowserContext {
    async fn load(&mut self, html: &str) -> Result<String> {
        let document = self.document_path();
        tokio::fs::write(&document, html).await?;

        let child = self.command(&document).spawn().map_err(|e| PreviewError::Sandbox {
            detail: format!("failed to launch {}: {e}", self.settings.browser),
        })?;
        debug!(browser = %self.settings.browser, pid = ?child.id(), "browser launched");

        let limit = Duration::from_millis(self.settings.timeout_ms);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(timeout_ms = self.settings.timeout_ms, "browser timed out");
                return Err(PreviewError::Sandbox {
                    detail: format!("browser did not finish within {} ms", self.settings.timeout_ms),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::Sandbox {
                detail: format!(
                    "browser exited with {}: {}",
                    output.status,
                    stderr.lines().last().unwrap_or_default()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
