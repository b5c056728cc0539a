use anyhow::{Context, Result};
use async_trait::async_trait;
use common::TrackId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telemetry::metrics::{SURVEILLANCE_ALERTS_RAISED, SURVEILLANCE_CAPABILITY_FAILURES};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

/// Raised when an unidentified person is on screen at a sampling boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownPersonAlert {
    pub frame_index: u64,
    pub source_label: String,
    pub unknown_tracks: Vec<TrackId>,
    pub timestamp: f64,
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &UnknownPersonAlert) -> Result<()>;
    fn channel(&self) -> &'static str;
}

/// Writes the alert to the log at WARN
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &UnknownPersonAlert) -> Result<()> {
        warn!(
            source = %alert.source_label,
            frame_index = alert.frame_index,
            tracks = ?alert.unknown_tracks,
            "Unknown person detected"
        );
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "log"
    }
}

/// Rings the terminal bell on stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBellNotifier;

#[async_trait]
impl AlertNotifier for TerminalBellNotifier {
    async fn notify(&self, _alert: &UnknownPersonAlert) -> Result<()> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(b"\x07")
            .await
            .context("Failed to write terminal bell")?;
        stderr.flush().await.context("Failed to flush stderr")?;
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "terminal_bell"
    }
}

/// Rate limit for unknown-person alerts: only frames whose index is a
/// multiple of `period` may raise one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    period: u64,
}

impl AlertPolicy {
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn should_alert(&self, frame_index: u64, unknown_present: bool) -> bool {
        unknown_present && frame_index % self.period == 0
    }
}

/// Fans an alert out to every registered notifier
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    notifiers: Vec<Arc<dyn AlertNotifier>>,
}

impl AlertDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn AlertNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Notifier failures are logged and never propagated
    pub async fn dispatch(&self, alert: &UnknownPersonAlert) {
        SURVEILLANCE_ALERTS_RAISED.inc();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(alert).await {
                SURVEILLANCE_CAPABILITY_FAILURES
                    .with_label_values(&["notifier"])
                    .inc();
                error!(
                    channel = notifier.channel(),
                    error = %e,
                    "Failed to deliver unknown-person alert"
                );
            }
        }
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels: Vec<_> = self.notifiers.iter().map(|n| n.channel()).collect();
        f.debug_struct("AlertDispatcher")
            .field("channels", &channels)
            .finish()
    }
}
