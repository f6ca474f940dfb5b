//! Service health: tool availability and job counts.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::jobs::JobCounts;
use crate::service::ConversionService;
use crate::toolchain::ToolStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Some enabled tool cannot be found
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs: JobCounts,
    pub tools: Vec<ToolStatus>,
}

impl ConversionService {
    /// Build a health report. `refresh` re-probes every tool instead of
    /// answering from the locator cache.
    pub async fn health(&self, refresh: bool, uptime: Duration) -> HealthReport {
        let tools = if refresh {
            self.locator.probe_all().await
        } else {
            self.locator.status_all().await
        };

        let missing: Vec<&str> = tools
            .iter()
            .filter(|status| status.enabled && !status.available)
            .map(|status| status.tool.as_ref())
            .collect();

        let (status, message) = if missing.is_empty() {
            (
                HealthStatus::Healthy,
                self.i18n.get("en", "health-status-healthy", None),
            )
        } else {
            let reason = format!("unavailable tools: {}", missing.join(", "));
            (
                HealthStatus::Degraded,
                self.i18n
                    .format("en", "health-status-degraded", &[("reason", &reason)]),
            )
        };

        HealthReport {
            status,
            message,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime.as_secs(),
            jobs: self.jobs.counts(),
            tools,
        }
    }

    /// Probe every tool once and log what was found
    pub async fn log_tool_availability(&self) {
        for status in self.locator.probe_all().await {
            if status.available {
                info!(
                    tool = %status.tool,
                    path = status.path.as_deref().unwrap_or_default(),
                    version = status.version.as_deref().unwrap_or("unknown"),
                    "Tool available"
                );
            } else if status.enabled {
                warn!(
                    tool = %status.tool,
                    reason = status.diagnostic.as_deref().unwrap_or_default(),
                    "Tool unavailable; jobs needing it will fail"
                );
            } else {
                info!(tool = %status.tool, "Tool disabled");
            }
        }
    }
}
