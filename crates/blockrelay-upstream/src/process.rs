//! `snek` chain-sync process as an upstream source.
//!
//! The process is started with the configured node address, network magic
//! and event filter, and writes one JSON record per stdout line. Lines that
//! are not JSON (banners, log noise) are skipped.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use blockrelay_core::SessionConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::source::{ErrorReporter, RawEventHandler, Subscription, UpstreamSource};

/// Spawns the chain-sync tool for each subscription.
#[derive(Clone, Debug)]
pub struct CommandSource {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl CommandSource {
    /// Run `program` with the default output flags.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: vec!["-output".to_string(), "log".to_string()],
        }
    }

    /// Replace the arguments appended after the generated flags.
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Full argument list for `config`.
    pub fn args(&self, config: &SessionConfig) -> Vec<String> {
        let mut args = vec![
            "-input-chainsync-address".to_string(),
            config.address.clone(),
            "-input-chainsync-network-magic".to_string(),
            config.network_magic.to_string(),
            format!("-input-chainsync-intersect-tip={}", config.intersect_at_tip),
            "-filter-type".to_string(),
            config.event_filter(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl UpstreamSource for CommandSource {
    fn name(&self) -> &'static str {
        "snek"
    }

    async fn start(
        &self,
        config: &SessionConfig,
        handler: RawEventHandler,
    ) -> Result<Subscription, UpstreamError> {
        validate_address(&config.address)?;

        let mut child = Command::new(&self.program)
            .args(self.args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                UpstreamError::StartFailed(format!("spawn {}: {e}", self.program.display()))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UpstreamError::StartFailed("child stdout not captured".into()))?;

        info!(
            pid = child.id(),
            program = %self.program.display(),
            address = %config.address,
            "upstream process started"
        );

        Ok(Subscription::spawn(move |cancel, reporter| {
            read_records(child, stdout, handler, cancel, reporter)
        }))
    }
}

async fn read_records(
    mut child: Child,
    stdout: ChildStdout,
    handler: RawEventHandler,
    cancel: CancellationToken,
    reporter: ErrorReporter,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                debug!("upstream process killed on cancel");
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch_line(&line, &handler),
                Ok(None) => break,
                Err(e) => {
                    let _ = child.kill().await;
                    reporter.report(UpstreamError::Io(e));
                    return;
                }
            },
        }
    }

    let status = tokio::select! {
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            return;
        }
        status = child.wait() => status,
    };
    let message = match status {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    };
    reporter.report(UpstreamError::Exited(message));
}

fn dispatch_line(line: &str, handler: &RawEventHandler) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(raw) => handler(raw),
        Err(e) => warn!(error = %e, line, "skipping non-JSON upstream output"),
    }
}

/// Require `host:port` with a non-empty host and a numeric port.
pub fn validate_address(address: &str) -> Result<(), UpstreamError> {
    let invalid = || UpstreamError::StartFailed(format!("invalid address {address:?}, expected host:port"));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    fn collecting_handler() -> (RawEventHandler, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: RawEventHandler = Arc::new(move |v| sink.lock().push(v));
        (handler, seen)
    }

    #[test]
    fn args_for_config() {
        let source = CommandSource::new("snek");
        let cfg = SessionConfig::default()
            .with_address("m2:6002", "unused")
            .with_event_types(["chainsync.rollback", "chainsync.block"])
            .unwrap();
        assert_eq!(
            source.args(&cfg),
            vec![
                "-input-chainsync-address",
                "m2:6002",
                "-input-chainsync-network-magic",
                "764824073",
                "-input-chainsync-intersect-tip=true",
                "-filter-type",
                "chainsync.block,chainsync.rollback",
                "-output",
                "log",
            ]
        );
    }

    #[test]
    fn extra_args_replaced() {
        let source = CommandSource::new("snek").with_extra_args(vec!["-output".into(), "webhook".into()]);
        let args = source.args(&SessionConfig::default());
        assert_eq!(args.last().map(String::as_str), Some("webhook"));
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("127.0.0.1:3001").is_ok());
        assert!(validate_address("relays.example.com:6000").is_ok());
        assert!(validate_address("[::1]:3001").is_ok());
        for bad in ["", "node", ":3001", "node:", "node:abc", "node:0", "node:70000", "my node:1"] {
            assert!(
                matches!(validate_address(bad), Err(UpstreamError::StartFailed(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn non_json_lines_skipped() {
        let (handler, seen) = collecting_handler();
        dispatch_line("snek starting up", &handler);
        dispatch_line("   ", &handler);
        dispatch_line(r#"{"type":"chainsync.block"}"#, &handler);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn invalid_address_fails_start() {
        let source = CommandSource::new("snek");
        let cfg = SessionConfig::default().with_address("not-an-address", "unused");
        let (handler, _) = collecting_handler();
        let err = source.start(&cfg, handler).await.unwrap_err();
        assert!(matches!(err, UpstreamError::StartFailed(_)));
    }

    #[tokio::test]
    async fn missing_binary_fails_start() {
        let source = CommandSource::new("/nonexistent/blockrelay-test-snek");
        let (handler, _) = collecting_handler();
        let err = source
            .start(&SessionConfig::default(), handler)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::StartFailed(ref m) if m.contains("spawn")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_records_and_reports_exit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-snek");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'starting'\necho '{\"type\":\"chainsync.block\",\"context\":{\"blockNumber\":1},\"payload\":{\"blockHash\":\"a\"}}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = CommandSource::new(&script);
        let (handler, seen) = collecting_handler();
        let mut sub = source
            .start(&SessionConfig::default(), handler)
            .await
            .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), &mut sub.errors)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, UpstreamError::Exited(_)));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0]["context"]["blockNumber"], 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_process_without_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-snek");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = CommandSource::new(&script);
        let (handler, _) = collecting_handler();
        let sub = source
            .start(&SessionConfig::default(), handler)
            .await
            .unwrap();
        sub.cancel_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), sub.task)
            .await
            .unwrap()
            .unwrap();
        assert!(sub.errors.await.is_err());
    }
}
