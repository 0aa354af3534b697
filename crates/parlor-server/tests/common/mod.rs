use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use parlor_core::protocol::{ClientPacket, ServerPacket};
use parlor_server::config::ServerConfig;
use parlor_server::core::{CoreCommand, ServerCore};
use parlor_server::db::Database;
use parlor_server::ws::{AppState, build_app};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    _core: tokio::task::JoinHandle<()>,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with a fresh in-memory database on an ephemeral
    /// port.
    pub async fn new() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let config = ServerConfig::default();
        let shutdown = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel::<CoreCommand>();

        let core = ServerCore::new(config, db);
        let core_task = tokio::spawn(core.run(command_rx, shutdown.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_app(AppState::new(command_tx, shutdown.clone()))
            .into_make_service_with_connect_info::<SocketAddr>();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the listener a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self { addr, shutdown, _core: core_task, _server: server_task }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("websocket connect");
    stream
}

pub async fn ws_send(stream: &mut WsStream, packet: &ClientPacket) {
    let json = serde_json::to_string(packet).unwrap();
    stream.send(Message::Text(json.into())).await.expect("websocket send");
}

/// Send a raw text frame, bypassing packet encoding.
pub async fn ws_send_raw(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.to_string().into())).await.expect("websocket send");
}

/// Read the next decoded server packet, failing after two seconds.
pub async fn ws_read(stream: &mut WsStream) -> ServerPacket {
    ws_try_read(stream, Duration::from_secs(2)).await.expect("expected a server packet")
}

/// Read a packet if one arrives within the window.
pub async fn ws_try_read(stream: &mut WsStream, window: Duration) -> Option<ServerPacket> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        let message = tokio::time::timeout(remaining, stream.next()).await.ok()??;
        match message.ok()? {
            Message::Text(text) => {
                if let Ok(packet) = serde_json::from_str::<ServerPacket>(text.as_str()) {
                    return Some(packet);
                }
            },
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read packets until one satisfies the predicate.
pub async fn ws_read_until(
    stream: &mut WsStream,
    mut predicate: impl FnMut(&ServerPacket) -> bool,
) -> ServerPacket {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for a matching packet"
        );
        let packet = ws_read(stream).await;
        if predicate(&packet) {
            return packet;
        }
    }
}

pub fn authorize_packet(username: &str, password: &str) -> ClientPacket {
    ClientPacket::Authorize { username: username.to_string(), password: password.to_string() }
}

pub fn menu_packet(menu_id: &str, selection_id: &str) -> ClientPacket {
    ClientPacket::Menu {
        menu_id: menu_id.to_string(),
        selection_id: Some(selection_id.to_string()),
        selection: None,
    }
}

/// Log in (registering on first use) and wait for the main menu.
pub async fn login(stream: &mut WsStream, username: &str) {
    ws_send(stream, &authorize_packet(username, "secret")).await;
    ws_read_until(stream, |p| {
        matches!(p, ServerPacket::ShowMenu { menu_id, .. } if menu_id == "main_menu")
    })
    .await;
}
