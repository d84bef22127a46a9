//! Provider process lifecycle.
//!
//! The provider is started with piped stdio. Its stdout is scanned line by
//! line until one line contains a `scheme://host:port` endpoint; everything
//! the provider writes to stderr is forwarded to the `provider` log target.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::errors::McpError;

static ENDPOINT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9+.\-]*://[A-Za-z0-9.\-_]+:\d{1,5}(?:/[^\s]*)?")
        .expect("endpoint pattern is valid")
});

/// How to launch the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerParameters {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Returns the first endpoint found in a line of provider output.
pub fn find_endpoint(line: &str) -> Option<&str> {
    ENDPOINT_PATTERN.find(line).map(|m| m.as_str())
}

/// A running provider process that has announced its endpoint.
pub struct ProcessTransport {
    command: String,
    endpoint: String,
    exited: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Spawn the provider and wait up to `timeout` for it to announce an endpoint.
    pub async fn launch(params: &ServerParameters, timeout: Duration) -> Result<Self, McpError> {
        debug!("Starting provider: {} {:?}", params.command, params.args);

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (key, value) in &params.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: params.command.clone(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            command: params.command.clone(),
            reason: "stdout was not captured".to_string(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "provider", "{}", line);
                }
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "provider", "{}", line);
                if let Some(endpoint) = find_endpoint(&line) {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(endpoint.to_string());
                    }
                }
            }
        });

        let announced = tokio::time::timeout(timeout, endpoint_rx).await;
        let endpoint = match announced {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                terminate(&mut child).await;
                return Err(McpError::Spawn {
                    command: params.command.clone(),
                    reason: "process exited before announcing an endpoint".to_string(),
                });
            }
            Err(_) => {
                terminate(&mut child).await;
                return Err(McpError::EndpointTimeout { timeout });
            }
        };
        info!("Provider {} announced endpoint {}", params.command, endpoint);

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watcher = tokio::spawn(watch(child, kill_rx, exited.clone(), params.command.clone()));

        Ok(Self {
            command: params.command.clone(),
            endpoint,
            exited,
            kill_tx: Some(kill_tx),
            watcher: Some(watcher),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_alive(&self) -> bool {
        self.kill_tx.is_some() && !self.exited.load(Ordering::SeqCst)
    }

    /// Terminate the provider. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                debug!("Provider watcher for {} ended abnormally: {}", self.command, e);
            }
        }
        self.exited.store(true, Ordering::SeqCst);
    }
}

async fn watch(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
    command: String,
) {
    tokio::select! {
        status = child.wait() => {
            exited.store(true, Ordering::SeqCst);
            match status {
                Ok(status) => warn!("Provider {} exited: {}", command, status),
                Err(e) => warn!("Provider {} could not be awaited: {}", command, e),
            }
        }
        _ = kill_rx => {
            terminate(&mut child).await;
            exited.store(true, Ordering::SeqCst);
            debug!("Provider {} terminated", command);
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Ignoring error while killing provider: {}", e);
    }
}
