//! Integration tests for the TCP control server

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

use oversight_guardian::core::{MonitorConfig, MonitorState, SharedConfig};
use oversight_guardian::notifier::NullNotifier;
use oversight_guardian::platform::ProcessControl;
use oversight_guardian::server::{ApiHandler, ControlServer, ServerState};

struct NoopControl;

impl ProcessControl for NoopControl {
    fn terminate(&self, _pid: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn force_terminate(&self, _pid: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_running(&self, _pid: u32) -> bool {
        false
    }

    fn launch(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        line.trim_end().to_string()
    }

    async fn request(&mut self, line: &str) -> String {
        self.send_raw(line).await;
        self.read_line().await
    }
}

/// Bind a server somewhere in [base, base+10] and run it in the background
async fn start_server(
    base: u16,
    config: MonitorConfig,
) -> (MonitorState, Arc<ServerState>, broadcast::Sender<()>, u16) {
    let state = MonitorState::new(
        SharedConfig::new(config),
        Arc::new(NoopControl),
        Arc::new(NullNotifier),
    );
    let (shutdown, _) = broadcast::channel(4);
    let server = ControlServer::bind(base, base + 10, shutdown.clone())
        .await
        .unwrap();
    let server_state = server.state();
    let port: u16 = server_state
        .address()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    let handler = Arc::new(ApiHandler::new(state.clone(), Arc::clone(&server_state)));
    let updates = state.updates.clone();
    tokio::spawn(async move {
        server.run(handler, updates).await;
    });

    (state, server_state, shutdown, port)
}

/// Test that getAppInfo answers with the exact identity frame
#[cfg(not(feature = "unsandboxed"))]
#[tokio::test]
async fn test_get_app_info_exact_frame() {
    let (_state, _server, _shutdown, port) = start_server(48610, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client
        .request(r#"{"method":"getAppInfo","id":1,"params":[]}"#)
        .await;

    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":1,"result":{"version":"1.0.0","appName":"OverSight Guardian","sandbox":true}}"#
    );
}

/// Test that an unknown method yields the exact error frame
#[tokio::test]
async fn test_unknown_method_error_frame() {
    let (_state, _server, _shutdown, port) = start_server(48630, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client.request(r#"{"method":"bogus"}"#).await;

    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32601,"message":"Method not found"}}"#
    );
}

/// Test that malformed JSON yields a parse error and the connection survives
#[tokio::test]
async fn test_parse_error_keeps_connection_open() {
    let (_state, _server, _shutdown, port) = start_server(48650, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client.request("this is not json").await;
    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#
    );

    // same connection still answers properly afterwards
    let reply = client.request(r#"{"method":"getOpenedApps","id":2}"#).await;
    assert_eq!(reply, r#"{"jsonrpc":"2.0","id":2,"result":[]}"#);
}

/// Test that no-param methods reject a non-empty params array
#[tokio::test]
async fn test_nonempty_params_rejected() {
    let (_state, _server, _shutdown, port) = start_server(48670, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client
        .request(r#"{"method":"getStatus","id":9,"params":[1]}"#)
        .await;

    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32602,"message":"Invalid params"}}"#
    );
}

/// Test that replies come back in the order requests were sent
#[tokio::test]
async fn test_replies_follow_request_order() {
    let (_state, _server, _shutdown, port) = start_server(48690, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    client.send_raw(r#"{"method":"getStatus","id":1}"#).await;
    client.send_raw(r#"{"method":"getOpenedApps","id":2}"#).await;
    client.send_raw(r#"{"method":"getStatus","id":3}"#).await;

    assert!(client.read_line().await.contains(r#""id":1"#));
    assert!(client.read_line().await.contains(r#""id":2"#));
    assert!(client.read_line().await.contains(r#""id":3"#));
}

/// Test that getStatus reports the bound address and stays stable
#[tokio::test]
async fn test_get_status_reports_address() {
    let (_state, _server, _shutdown, port) = start_server(48710, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let expected = format!(
        r#"{{"jsonrpc":"2.0","id":4,"result":{{"active":true,"address":"0.0.0.0:{}"}}}}"#,
        port
    );
    let first = client.request(r#"{"method":"getStatus","id":4}"#).await;
    let second = client.request(r#"{"method":"getStatus","id":4}"#).await;

    assert_eq!(first, expected);
    assert_eq!(second, expected);
}

/// Test that only subscribed connections receive push updates
#[tokio::test]
async fn test_push_updates_reach_subscribers_only() {
    let (state, _server, _shutdown, port) = start_server(48730, MonitorConfig::default()).await;
    let mut subscriber = Client::connect(port).await;
    let mut bystander = Client::connect(port).await;

    let reply = subscriber.request(r#"{"method":"subscribe","id":1}"#).await;
    assert_eq!(reply, r#"{"jsonrpc":"2.0","id":1,"result":"Successfully subscribed"}"#);

    // make sure the bystander is fully connected before broadcasting
    let _ = bystander.request(r#"{"method":"getStatus"}"#).await;

    state.broadcast(serde_json::json!({
        "Camera": {"deviceName": "FaceTime HD", "inUse": true}
    }));

    let push = subscriber.read_line().await;
    assert_eq!(
        push,
        r#"{"jsonrpc":"2.0","update":{"Camera":{"deviceName":"FaceTime HD","inUse":true}}}"#
    );

    let mut line = String::new();
    let waited = timeout(
        Duration::from_millis(200),
        bystander.reader.read_line(&mut line),
    )
    .await;
    assert!(waited.is_err(), "bystander should not receive pushes");
}

/// Test that closeApp is refused in the sandboxed build
#[cfg(not(feature = "unsandboxed"))]
#[tokio::test]
async fn test_close_app_sandboxed_error() {
    let (_state, _server, _shutdown, port) = start_server(48750, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client
        .request(r#"{"method":"closeApp","id":5,"params":["Safari"]}"#)
        .await;

    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32604,"message":"Method does not work in OverSight Guardian from Mac App Store. Download the non sandboxed version to use this method"}}"#
    );
}

/// Test that shutdown stops the accept loop but leaves open connections alive
#[tokio::test]
async fn test_shutdown_closes_listener_but_not_connections() {
    let (_state, _server, _shutdown, port) = start_server(48770, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let reply = client.request(r#"{"method":"shutdown","id":1}"#).await;
    assert_eq!(reply, r#"{"jsonrpc":"2.0","id":1,"result":""}"#);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

    // the existing connection still answers, now reporting inactive
    let status = client.request(r#"{"method":"getStatus","id":2}"#).await;
    assert!(status.contains(r#""active":false"#));
}

/// Test that openApp validates params and reports per-path results
#[tokio::test]
async fn test_open_app_param_validation() {
    let (_state, _server, _shutdown, port) = start_server(48790, MonitorConfig::default()).await;
    let mut client = Client::connect(port).await;

    let empty = client.request(r#"{"method":"openApp","id":1,"params":[]}"#).await;
    assert!(empty.contains(r#""code":-32602"#));

    let opened = client
        .request(r#"{"method":"openApp","id":2,"params":["/tmp/fake.app"]}"#)
        .await;
    assert_eq!(
        opened,
        r#"{"jsonrpc":"2.0","id":2,"result":{"openAppsResult":{"/tmp/fake.app":true}}}"#
    );
}

/// Test that disabled categories answer with their message strings
#[tokio::test]
async fn test_disabled_category_messages() {
    let config = MonitorConfig {
        monitor_open_apps: false,
        monitor_cameras: false,
        monitor_microphones: false,
        ..Default::default()
    };
    let (_state, _server, _shutdown, port) = start_server(48810, config).await;
    let mut client = Client::connect(port).await;

    let opened = client.request(r#"{"method":"getOpenedApps","id":1}"#).await;
    assert_eq!(
        opened,
        r#"{"jsonrpc":"2.0","id":1,"result":"Monitoring Apps is disabled"}"#
    );

    let devices = client.request(r#"{"method":"getDevices","id":2}"#).await;
    assert_eq!(
        devices,
        r#"{"jsonrpc":"2.0","id":2,"result":{"cameras":"disabled","microphones":"disabled"}}"#
    );
}
