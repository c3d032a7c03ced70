//! Control server - TCP listener, wire protocol, and request dispatch

pub mod handler;
pub mod protocol;
pub mod socket;

pub use handler::{ApiHandler, RequestHandler};
pub use protocol::{Method, Request, RpcError};
pub use socket::{find_first_port, ControlServer, ServerState};
