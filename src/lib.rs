//! OverSight Guardian - Local control server and polling engine
//!
//! Watches running applications, camera/microphone usage, and system
//! resources on a fixed 5-second cadence, and exposes the collected state
//! over a newline-delimited JSON-RPC control socket for a GUI or script
//! to consume.

pub mod core;
pub mod error;
pub mod notifier;
pub mod persistence;
pub mod platform;
pub mod server;

/// Application name constant
pub const APP_NAME: &str = "OverSight Guardian";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether this build runs under the App Store sandbox.
///
/// The sandboxed build refuses `closeApp` requests; everything else
/// behaves identically.
pub const fn is_sandboxed() -> bool {
    !cfg!(feature = "unsandboxed")
}
