//! `cache_health` MCP tool
//!
//! Thin adapter between agent tool calls and [`CacheVersionManager`]. The only
//! logic here is parameter presence validation and response formatting.

use crate::error::{CacheError, Result};
use crate::version::{component_cache_key, CacheVersionManager, VersionCheck};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tool name as registered with the MCP server
pub const CACHE_HEALTH_TOOL: &str = "cache_health";

/// JSON-RPC "invalid params" code, reported on validation failures
pub const INVALID_PARAMS: i32 = -32602;

/// MCP tool definition: name, description and JSON Schema for the input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Operations exposed by the tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Status,
    InvalidateAll,
    InvalidateComponent,
    CheckUpdates,
}

impl CacheAction {
    pub const ALL: [CacheAction; 4] = [
        CacheAction::Status,
        CacheAction::InvalidateAll,
        CacheAction::InvalidateComponent,
        CacheAction::CheckUpdates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheAction::Status => "status",
            CacheAction::InvalidateAll => "invalidate_all",
            CacheAction::InvalidateComponent => "invalidate_component",
            CacheAction::CheckUpdates => "check_updates",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == raw)
            .ok_or_else(|| {
                CacheError::Validation(format!(
                    "unknown action {:?}; expected one of status, invalidate_all, invalidate_component, check_updates",
                    raw
                ))
            })
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheHealthArgs {
    action: Option<String>,
    component_name: Option<String>,
    framework: Option<String>,
}

/// Structured result plus a recommendation for the agent
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub data: Value,
    pub recommendation: String,
}

impl ToolOutput {
    /// MCP `tools/call` result: `{"content": [{"type": "text", ...}], "isError": false}`
    pub fn into_mcp_result(self) -> Value {
        let mut body = self.data;
        if let Value::Object(map) = &mut body {
            map.insert("recommendation".to_string(), Value::String(self.recommendation));
        }

        json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string())
            }],
            "isError": false
        })
    }
}

/// MCP tool error result carrying the JSON-RPC code
pub fn mcp_error_result(error: &CacheError) -> Value {
    let (code, label) = match error {
        CacheError::Validation(_) => (INVALID_PARAMS, "VALIDATION_ERROR"),
        _ => (-32603, "EXECUTION_ERROR"),
    };

    json!({
        "content": [{
            "type": "text",
            "text": format!("[{} {}] {}", label, code, error)
        }],
        "isError": true,
        "errorCode": code
    })
}

/// Handler for the `cache_health` tool
#[derive(Clone)]
pub struct CacheHealthTool {
    manager: Arc<CacheVersionManager>,
}

impl CacheHealthTool {
    pub fn new(manager: Arc<CacheVersionManager>) -> Self {
        Self { manager }
    }

    /// Definition for `tools/list`
    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: CACHE_HEALTH_TOOL.to_string(),
            description: "Inspect and manage the Material 3 data cache. \
                          Report cache health, clear everything, clear one component, \
                          or check the upstream repositories for changes."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["status", "invalidate_all", "invalidate_component", "check_updates"],
                        "description": "Cache operation to perform"
                    },
                    "componentName": {
                        "type": "string",
                        "description": "Component to invalidate (invalidate_component only)"
                    },
                    "framework": {
                        "type": "string",
                        "description": "Framework of the component, e.g. web or flutter (invalidate_component only)"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    /// Run the tool and wrap the outcome as an MCP result
    pub async fn handle(&self, arguments: Value) -> Value {
        match self.call(arguments).await {
            Ok(output) => output.into_mcp_result(),
            Err(e) => {
                warn!("{} call rejected: {}", CACHE_HEALTH_TOOL, e);
                mcp_error_result(&e)
            }
        }
    }

    /// Run the tool; only invalid arguments produce an error
    pub async fn call(&self, arguments: Value) -> Result<ToolOutput> {
        let args: CacheHealthArgs = if arguments.is_null() {
            CacheHealthArgs::default()
        } else {
            serde_json::from_value(arguments)
                .map_err(|e| CacheError::Validation(format!("invalid arguments: {}", e)))?
        };

        let action = match non_empty(args.action.as_deref()) {
            Some(raw) => CacheAction::parse(raw)?,
            None => return Err(CacheError::Validation("action is required".to_string())),
        };
        debug!("{} action: {}", CACHE_HEALTH_TOOL, action);

        match action {
            CacheAction::Status => Ok(self.status().await),
            CacheAction::InvalidateAll => Ok(self.invalidate_all().await),
            CacheAction::InvalidateComponent => {
                let name = non_empty(args.component_name.as_deref()).ok_or_else(|| {
                    CacheError::Validation(
                        "componentName is required for invalidate_component".to_string(),
                    )
                })?;
                let framework = non_empty(args.framework.as_deref()).ok_or_else(|| {
                    CacheError::Validation(
                        "framework is required for invalidate_component".to_string(),
                    )
                })?;
                Ok(self.invalidate_component(name, framework).await)
            }
            CacheAction::CheckUpdates => Ok(self.check_updates().await),
        }
    }

    async fn status(&self) -> ToolOutput {
        let health = self.manager.cache_health().await;

        let recommendation = match &health.version {
            None => "Cache has not been initialized yet; run check_updates to initialize it."
                .to_string(),
            Some(version) if version != &health.build_version => format!(
                "Cache was written by version {}; it will be rebuilt on the next check.",
                version
            ),
            Some(_) if health.needs_check => {
                "Upstream check is due; run check_updates to look for new Material releases."
                    .to_string()
            }
            Some(_) => "Cache is healthy; no action needed.".to_string(),
        };

        ToolOutput {
            data: json!({
                "action": CacheAction::Status.as_str(),
                "health": health,
            }),
            recommendation,
        }
    }

    async fn invalidate_all(&self) -> ToolOutput {
        self.manager.invalidate_all_caches().await;

        ToolOutput {
            data: json!({
                "action": CacheAction::InvalidateAll.as_str(),
                "success": true,
                "message": "All cache partitions cleared",
            }),
            recommendation: "Subsequent requests will fetch fresh data from upstream.".to_string(),
        }
    }

    async fn invalidate_component(&self, name: &str, framework: &str) -> ToolOutput {
        let removed = self.manager.invalidate_component(name, framework).await;

        let recommendation = if removed {
            format!("The next request for {} ({}) will fetch fresh data.", name, framework)
        } else {
            format!(
                "{} ({}) was not cached; nothing to refresh.",
                name, framework
            )
        };

        ToolOutput {
            data: json!({
                "action": CacheAction::InvalidateComponent.as_str(),
                "success": true,
                "componentName": name,
                "framework": framework,
                "cacheKey": component_cache_key(framework, name),
                "removed": removed,
            }),
            recommendation,
        }
    }

    async fn check_updates(&self) -> ToolOutput {
        let outcome = self.manager.check().await;
        let changed = outcome.invalidated();

        let recommendation = match outcome {
            VersionCheck::Initialized => "Cache initialized; data will be fetched on demand.",
            VersionCheck::VersionMismatch { .. } => {
                "Cache was built by another version and has been cleared."
            }
            VersionCheck::UpstreamChanged => {
                "Upstream repositories changed; cached data was cleared and will be refetched."
            }
            VersionCheck::UpstreamUnchanged => "Cached data matches upstream; no action needed.",
            VersionCheck::Fresh => {
                "Upstream was checked recently; cached data is considered current."
            }
            VersionCheck::UpstreamUnavailable => {
                "Upstream could not be reached; serving cached data until the next check."
            }
        };

        ToolOutput {
            data: json!({
                "action": CacheAction::CheckUpdates.as_str(),
                "upstream_changes_detected": changed,
                "outcome": outcome_label(&outcome),
            }),
            recommendation: recommendation.to_string(),
        }
    }
}

fn outcome_label(outcome: &VersionCheck) -> &'static str {
    match outcome {
        VersionCheck::Initialized => "initialized",
        VersionCheck::VersionMismatch { .. } => "version_mismatch",
        VersionCheck::Fresh => "fresh",
        VersionCheck::UpstreamChanged => "upstream_changed",
        VersionCheck::UpstreamUnchanged => "upstream_unchanged",
        VersionCheck::UpstreamUnavailable => "upstream_unavailable",
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
