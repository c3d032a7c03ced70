//! Wire protocol - newline-delimited JSON-RPC request and reply frames

use serde::Serialize;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Every method the control server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetAppInfo,
    Subscribe,
    GetOpenedApps,
    GetStatus,
    Shutdown,
    GetSystem,
    GetDevices,
    GetMonitoredApps,
    OpenApp,
    CloseApp,
    /// Reserved; accepted and acknowledged with an empty result
    ChangeTimer,
    /// Reserved; accepted and acknowledged with an empty result
    GetTimer,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "getAppInfo" => Some(Self::GetAppInfo),
            "subscribe" => Some(Self::Subscribe),
            "getOpenedApps" => Some(Self::GetOpenedApps),
            "getStatus" => Some(Self::GetStatus),
            "shutdown" => Some(Self::Shutdown),
            "getSystem" => Some(Self::GetSystem),
            "getDevices" => Some(Self::GetDevices),
            "getMonitoredApps" => Some(Self::GetMonitoredApps),
            "openApp" => Some(Self::OpenApp),
            "closeApp" => Some(Self::CloseApp),
            "changeTimer" => Some(Self::ChangeTimer),
            "getTimer" => Some(Self::GetTimer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAppInfo => "getAppInfo",
            Self::Subscribe => "subscribe",
            Self::GetOpenedApps => "getOpenedApps",
            Self::GetStatus => "getStatus",
            Self::Shutdown => "shutdown",
            Self::GetSystem => "getSystem",
            Self::GetDevices => "getDevices",
            Self::GetMonitoredApps => "getMonitoredApps",
            Self::OpenApp => "openApp",
            Self::CloseApp => "closeApp",
            Self::ChangeTimer => "changeTimer",
            Self::GetTimer => "getTimer",
        }
    }
}

/// A parsed inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub id: Option<i64>,
    pub params: Vec<Value>,
}

/// Protocol-level failures, each mapping to a wire error code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("Parse error")]
    Parse,
    #[error("Invalid Request")]
    InvalidRequest,
    #[error("Method not found")]
    MethodNotFound,
    #[error("Invalid params")]
    InvalidParams,
    #[error("Internal error")]
    Internal,
    #[error(
        "Method does not work in OverSight Guardian from Mac App Store. \
         Download the non sandboxed version to use this method"
    )]
    Sandboxed,
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::Sandboxed => -32604,
        }
    }
}

/// Parse one inbound line into a request
///
/// A line must be a JSON object carrying a string `method`, an optional
/// integer `id`, and an optional array `params`. The error variant maps
/// straight to the reply frame for a rejected line.
pub fn parse_line(line: &str) -> Result<Request, RpcError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RpcError::Parse)?;
    let object = value.as_object().ok_or(RpcError::InvalidRequest)?;

    let method_name = object
        .get("method")
        .and_then(Value::as_str)
        .ok_or(RpcError::InvalidRequest)?;
    let method = Method::parse(method_name).ok_or(RpcError::MethodNotFound)?;

    let id = object.get("id").and_then(Value::as_i64);
    let params = match object.get("params") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(RpcError::InvalidParams),
    };

    Ok(Request { method, id, params })
}

/// Successful reply frame; field order is part of the wire format
#[derive(Debug, Serialize)]
pub struct ResultFrame {
    pub jsonrpc: &'static str,
    pub id: Option<i64>,
    pub result: Value,
}

impl ResultFrame {
    pub fn new(id: Option<i64>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Failure reply frame; the id is always null regardless of the request
#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub jsonrpc: &'static str,
    pub id: Option<i64>,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            error: ErrorBody {
                code: error.code(),
                message: error.to_string(),
            },
        }
    }
}

/// Unsolicited push frame sent to subscribed connections
#[derive(Debug, Serialize)]
pub struct UpdateFrame {
    pub jsonrpc: &'static str,
    pub update: Value,
}

impl UpdateFrame {
    pub fn new(update: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            update,
        }
    }
}
