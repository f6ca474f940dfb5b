//! Resolution of tool descriptors to executable paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::error::ConversionError;

use super::{ProcessInvoker, ToolDescriptor, ToolKind};

const MAX_VERSION_CHARS: usize = 120;

/// An executable that was found, with the timeout its operations run under
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub kind: ToolKind,
    pub path: PathBuf,
    pub timeout: Duration,
}

/// Availability report for one tool, as shown by the health endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub tool: ToolKind,
    pub enabled: bool,
    pub available: bool,
    pub path: Option<String>,
    pub version: Option<String>,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone)]
struct Resolution {
    outcome: Result<ResolvedTool, String>,
    version: Option<String>,
}

/// Finds external executables.
///
/// `resolve` answers from a per-tool cache after the first lookup; `probe`
/// always looks again and replaces the cached answer.
pub struct ToolLocator {
    descriptors: HashMap<ToolKind, ToolDescriptor>,
    invoker: ProcessInvoker,
    cache: DashMap<ToolKind, Resolution>,
}

impl ToolLocator {
    pub fn from_config(config: &ToolsConfig) -> Self {
        let descriptors = ToolKind::iter().map(|kind| ToolDescriptor::from_config(kind, config.get(kind)));
        Self::with_descriptors(descriptors, ProcessInvoker::new(config.kill_grace()))
    }

    pub fn with_descriptors(
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
        invoker: ProcessInvoker,
    ) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.kind(), descriptor))
                .collect(),
            invoker,
            cache: DashMap::new(),
        }
    }

    pub fn invoker(&self) -> &ProcessInvoker {
        &self.invoker
    }

    /// Resolve `kind` to an executable, using the cached answer if there is one.
    pub async fn resolve(&self, kind: ToolKind) -> Result<ResolvedTool, ConversionError> {
        if let Some(cached) = self.cache.get(&kind) {
            return unavailable_as_error(kind, cached.outcome.clone());
        }

        let resolution = self.lookup(kind, false).await;
        let outcome = resolution.outcome.clone();
        // A concurrent probe may have landed first; keep whichever is there
        self.cache.entry(kind).or_insert(resolution);
        unavailable_as_error(kind, outcome)
    }

    /// Look `kind` up again, bypassing and refreshing the cache.
    pub async fn probe(&self, kind: ToolKind) -> ToolStatus {
        let resolution = self.lookup(kind, true).await;
        let status = self.status_from(kind, &resolution);
        self.cache.insert(kind, resolution);
        status
    }

    pub async fn probe_all(&self) -> Vec<ToolStatus> {
        let mut statuses = Vec::new();
        for kind in ToolKind::iter() {
            statuses.push(self.probe(kind).await);
        }
        statuses
    }

    /// Status of every tool from the cache, resolving any not yet looked up.
    pub async fn status_all(&self) -> Vec<ToolStatus> {
        let mut statuses = Vec::new();
        for kind in ToolKind::iter() {
            let cached = self.cache.get(&kind).map(|entry| entry.value().clone());
            let status = match cached {
                Some(resolution) => self.status_from(kind, &resolution),
                None => self.probe(kind).await,
            };
            statuses.push(status);
        }
        statuses
    }

    fn status_from(&self, kind: ToolKind, resolution: &Resolution) -> ToolStatus {
        let enabled = self
            .descriptors
            .get(&kind)
            .is_some_and(|descriptor| descriptor.enabled());

        match &resolution.outcome {
            Ok(tool) => ToolStatus {
                tool: kind,
                enabled,
                available: true,
                path: Some(tool.path.display().to_string()),
                version: resolution.version.clone(),
                diagnostic: None,
            },
            Err(reason) => ToolStatus {
                tool: kind,
                enabled,
                available: false,
                path: None,
                version: None,
                diagnostic: Some(reason.clone()),
            },
        }
    }

    async fn lookup(&self, kind: ToolKind, with_version: bool) -> Resolution {
        let Some(descriptor) = self.descriptors.get(&kind) else {
            return Resolution::unavailable("no descriptor registered");
        };
        if !descriptor.enabled() {
            return Resolution::unavailable("disabled by configuration");
        }

        let mut tried = Vec::new();
        for candidate in descriptor.candidates() {
            tried.push(candidate.display().to_string());

            if candidate.is_absolute() {
                if !is_file(candidate).await {
                    continue;
                }
                let version = if with_version {
                    self.read_version(candidate, descriptor).await
                } else {
                    None
                };
                return Resolution::found(descriptor, candidate, version);
            }

            match self
                .invoker
                .run(candidate, descriptor.version_args(), descriptor.probe_timeout())
                .await
            {
                Ok(result) if result.is_success() => {
                    let version = first_line(&result.stdout).or_else(|| first_line(&result.stderr));
                    return Resolution::found(descriptor, candidate, version);
                }
                Ok(result) => {
                    debug!(tool = %kind, candidate = %candidate.display(), outcome = ?result.outcome, "Version probe failed");
                }
                Err(e) => {
                    debug!(tool = %kind, candidate = %candidate.display(), error = %e.source, "Candidate not on search path");
                }
            }
        }

        let reason = format!("not found (tried: {})", tried.join(", "));
        info!(tool = %kind, %reason, "Tool unavailable");
        Resolution::unavailable(reason)
    }

    async fn read_version(&self, path: &Path, descriptor: &ToolDescriptor) -> Option<String> {
        match self
            .invoker
            .run(path, descriptor.version_args(), descriptor.probe_timeout())
            .await
        {
            Ok(result) => first_line(&result.stdout).or_else(|| first_line(&result.stderr)),
            Err(e) => {
                debug!(path = %path.display(), error = %e.source, "Could not read tool version");
                None
            }
        }
    }
}

impl Resolution {
    fn found(descriptor: &ToolDescriptor, path: &Path, version: Option<String>) -> Self {
        debug!(tool = %descriptor.kind(), path = %path.display(), "Resolved tool");
        Self {
            outcome: Ok(ResolvedTool {
                kind: descriptor.kind(),
                path: path.to_path_buf(),
                timeout: descriptor.timeout(),
            }),
            version,
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(reason.into()),
            version: None,
        }
    }
}

fn unavailable_as_error(
    kind: ToolKind,
    outcome: Result<ResolvedTool, String>,
) -> Result<ResolvedTool, ConversionError> {
    outcome.map_err(|reason| ConversionError::ToolUnavailable { tool: kind, reason })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(MAX_VERSION_CHARS).collect())
}
