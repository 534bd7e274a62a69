//! Checkpoint summaries
//!
//! A [`SummaryService`] turns unified-diff text into a one-line description
//! of what changed. The service is optional and may be slow or unreachable,
//! so every call goes through [`summarize_with_timeout`], which never fails:
//! errors and timeouts degrade to [`FALLBACK_SUMMARY`].

use crate::error::Result;
use crate::hunk::count_changes;
use crate::types::Hunk;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Label used when the summary service fails or times out
pub const FALLBACK_SUMMARY: &str = "Checkpoint (summary unavailable)";

/// Produces a natural-language description of a diff
#[async_trait]
pub trait SummaryService: Send + Sync {
    /// Summarize unified-diff text
    async fn summarize(&self, diff_text: &str) -> Result<String>;
}

/// Ask `service` for a summary, bounded by `timeout`
///
/// Returns [`FALLBACK_SUMMARY`] on error, timeout or an empty answer.
pub async fn summarize_with_timeout(
    service: &dyn SummaryService,
    diff_text: &str,
    timeout: Duration,
) -> String {
    match tokio::time::timeout(timeout, service.summarize(diff_text)).await {
        Ok(Ok(text)) => {
            let text = text.trim();
            if text.is_empty() {
                debug!("Summary service returned nothing");
                FALLBACK_SUMMARY.to_string()
            } else {
                text.to_string()
            }
        }
        Ok(Err(e)) => {
            warn!("Summary service failed: {}", e);
            FALLBACK_SUMMARY.to_string()
        }
        Err(_) => {
            warn!("Summary service timed out after {}", humantime::format_duration(timeout));
            FALLBACK_SUMMARY.to_string()
        }
    }
}

/// Summary computed locally from the hunks
pub fn local_summary(hunks: &[Hunk]) -> String {
    let (added, deleted) = count_changes(hunks);
    match (added, deleted) {
        (0, 0) => "No changes".to_string(),
        (a, 0) => format!("Added {} line{}", a, plural(a)),
        (0, d) => format!("Removed {} line{}", d, plural(d)),
        (a, d) => format!("Changed {} line{} (+{} -{})", a.max(d), plural(a.max(d)), a, d),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
