//! Request dispatch - every control method answered against live state

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use super::protocol::{Method, Request, RpcError};
use super::socket::ServerState;
use crate::core::scheduler::POLL_INTERVAL_SECS;
use crate::core::MonitorState;

/// Serves parsed requests; one shared instance covers all connections
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request, peer: &str) -> Result<Value, RpcError>;
}

/// Static identity block returned by getAppInfo
#[derive(Debug, Serialize)]
struct AppInfo {
    version: &'static str,
    #[serde(rename = "appName")]
    app_name: &'static str,
    sandbox: bool,
}

impl AppInfo {
    fn current() -> Self {
        Self {
            version: crate::APP_VERSION,
            app_name: crate::APP_NAME,
            sandbox: crate::is_sandboxed(),
        }
    }
}

/// getSystem reply; each category is stats, a disabled message, or null
#[derive(Debug, Serialize)]
struct SystemResult {
    cpu: Value,
    memory: Value,
    battery: Value,
}

/// The production handler over monitoring and server state
pub struct ApiHandler {
    state: MonitorState,
    server: Arc<ServerState>,
}

impl ApiHandler {
    pub fn new(state: MonitorState, server: Arc<ServerState>) -> Self {
        Self { state, server }
    }

    async fn get_opened_apps(&self) -> Result<Value, RpcError> {
        if !self.state.config.snapshot().monitor_open_apps {
            return Ok(json!("Monitoring Apps is disabled"));
        }
        Ok(json!(self.state.open_apps().await))
    }

    async fn get_system(&self) -> Result<Value, RpcError> {
        let config = self.state.config.snapshot();
        let report = self.state.resources.read().await.report();

        let cpu = if config.monitor_cpu {
            encode_optional(report.cpu)?
        } else {
            json!("CPU monitoring is disabled")
        };
        let memory = if config.monitor_ram {
            encode_optional(report.memory)?
        } else {
            json!("Memory monitoring is disabled")
        };
        let battery = if config.monitor_battery {
            encode_optional(report.battery)?
        } else {
            json!("Battery monitoring is disabled")
        };

        serde_json::to_value(SystemResult {
            cpu,
            memory,
            battery,
        })
        .map_err(|_| RpcError::Internal)
    }

    async fn get_devices(&self) -> Result<Value, RpcError> {
        let config = self.state.config.snapshot();

        let cameras = if config.monitor_cameras {
            encode_list(&self.state.camera_snapshots().await)?
        } else {
            json!("disabled")
        };
        let microphones = if config.monitor_microphones {
            encode_list(&self.state.microphone_snapshots().await)?
        } else {
            json!("disabled")
        };

        Ok(json!({
            "cameras": cameras,
            "microphones": microphones,
        }))
    }

    async fn get_monitored_apps(&self) -> Result<Value, RpcError> {
        encode_list(&self.state.app_snapshots().await)
    }

    async fn open_app(&self, paths: Vec<String>) -> Result<Value, RpcError> {
        let mut results = serde_json::Map::new();
        for path in paths {
            let opened = self.state.open_application(&path);
            results.insert(path, Value::Bool(opened));
        }
        Ok(json!({ "openAppsResult": results }))
    }

    async fn close_app(&self, names: Vec<String>) -> Result<Value, RpcError> {
        let done = self.state.request_terminate(names).await;
        // The cycle that consumes the queue resolves the signal; cap the
        // wait at two intervals in case monitoring is paused.
        match timeout(Duration::from_secs(POLL_INTERVAL_SECS * 2), done).await {
            Ok(_) => {}
            Err(_) => warn!("closeApp wait timed out before a cycle consumed the request"),
        }
        Ok(json!("Attempting to quit"))
    }
}

#[async_trait]
impl RequestHandler for ApiHandler {
    async fn handle(&self, request: Request, peer: &str) -> Result<Value, RpcError> {
        match request.method {
            Method::GetAppInfo => {
                expect_no_params(&request)?;
                serde_json::to_value(AppInfo::current()).map_err(|_| RpcError::Internal)
            }
            Method::Subscribe => {
                expect_no_params(&request)?;
                self.server.subscribe(peer).await;
                Ok(json!("Successfully subscribed"))
            }
            Method::GetOpenedApps => {
                expect_no_params(&request)?;
                self.get_opened_apps().await
            }
            Method::GetStatus => {
                expect_no_params(&request)?;
                Ok(json!({
                    "active": self.server.is_active(),
                    "address": self.server.address(),
                }))
            }
            Method::Shutdown => {
                expect_no_params(&request)?;
                info!("Shutdown requested over API");
                if !self.server.shutdown() {
                    return Err(RpcError::Internal);
                }
                Ok(json!(""))
            }
            Method::GetSystem => {
                expect_no_params(&request)?;
                self.get_system().await
            }
            Method::GetDevices => {
                expect_no_params(&request)?;
                self.get_devices().await
            }
            Method::GetMonitoredApps => {
                expect_no_params(&request)?;
                self.get_monitored_apps().await
            }
            Method::OpenApp => self.open_app(string_params(&request)?).await,
            Method::CloseApp => {
                if crate::is_sandboxed() {
                    return Err(RpcError::Sandboxed);
                }
                self.close_app(string_params(&request)?).await
            }
            Method::ChangeTimer | Method::GetTimer => {
                expect_no_params(&request)?;
                Ok(json!(""))
            }
        }
    }
}

fn expect_no_params(request: &Request) -> Result<(), RpcError> {
    if request.params.is_empty() {
        Ok(())
    } else {
        Err(RpcError::InvalidParams)
    }
}

/// A non-empty params array of strings, or invalidParams
fn string_params(request: &Request) -> Result<Vec<String>, RpcError> {
    if request.params.is_empty() {
        return Err(RpcError::InvalidParams);
    }
    request
        .params
        .iter()
        .map(|param| {
            param
                .as_str()
                .map(str::to_string)
                .ok_or(RpcError::InvalidParams)
        })
        .collect()
}

fn encode_optional<T: Serialize>(value: Option<T>) -> Result<Value, RpcError> {
    match value {
        Some(value) => serde_json::to_value(value).map_err(|_| RpcError::Internal),
        None => Ok(Value::Null),
    }
}

/// Encode each item to its own JSON string, the list format the original
/// clients expect
fn encode_list<T: Serialize>(items: &[T]) -> Result<Value, RpcError> {
    let mut encoded = Vec::with_capacity(items.len());
    for item in items {
        encoded.push(serde_json::to_string(item).map_err(|_| RpcError::Internal)?);
    }
    Ok(json!(encoded))
}
