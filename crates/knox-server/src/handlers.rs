//! Connection handlers for the Knox server.
//!
//! This module owns the WebSocket lifecycle: upgrade-time authentication,
//! frame decoding, and the per-connection writer that drains the outbox.

use crate::auth::JwtAuthenticator;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::store::open_store;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use knox_core::{
    AuthError, Authenticator, ConnectionHub, ConnectionId, Credentials, HubConfig, HubError,
    Identity, MessageStore, RegistryConfig, RoomRegistry,
};
use knox_protocol::{codec, ClientEvent, Encoded, ServerEvent, WireFormat};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub hub: ConnectionHub,
    pub authenticator: Arc<dyn Authenticator>,
    pub slots: Arc<ConnectionSlots>,
    pub config: Config,
}

/// Admission counter for `limits.max_connections`.
///
/// A slot is taken before the upgrade and held for the connection's whole
/// lifetime, so concurrent upgrades cannot overshoot the limit.
#[derive(Debug)]
pub struct ConnectionSlots {
    in_use: AtomicUsize,
    max: usize,
}

impl ConnectionSlots {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            in_use: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve a slot, or `None` if the limit is reached.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.max;
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                slots: Arc::clone(self),
            })
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

/// A reserved connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    slots: Arc<ConnectionSlots>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.slots.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let registry = RoomRegistry::with_config(RegistryConfig {
            max_room_name_length: config.limits.max_room_name_length,
        });
        let hub_config = HubConfig {
            history_limit: config.history.limit,
        };

        Self {
            hub: ConnectionHub::new(Arc::new(registry), store, hub_config),
            authenticator,
            slots: Arc::new(ConnectionSlots::new(config.limits.max_connections)),
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer token, for clients that cannot set headers.
    pub token: Option<String>,
    /// `json` (default) or `msgpack`.
    pub format: Option<String>,
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let secret = config
        .auth
        .jwt_secret
        .clone()
        .filter(|secret| !secret.is_empty())
        .context("auth.jwt_secret must be set (KNOX_AUTH__JWT_SECRET)")?;
    let store = open_store(&config.store.url, config.store.max_connections).await?;
    let authenticator = Arc::new(JwtAuthenticator::new(&secret));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, store, authenticator));
    let app = router(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;

    info!("Knox server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.hub.registry().room_count(),
        "connections": state.hub.connection_count(),
    }))
}

/// WebSocket upgrade handler.
///
/// Authentication and format negotiation happen before the upgrade, so a
/// rejected client never gets a session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = state.slots.try_acquire() else {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    let format = match params.format.as_deref().map(str::parse::<WireFormat>) {
        None => WireFormat::default(),
        Some(Ok(format)) => format,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let identity = match authenticate(&state, &headers, params.token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Rejected unauthenticated upgrade");
            metrics::record_error("auth");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity, format, slot))
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<String>,
) -> Result<Identity, AuthError> {
    let credentials = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(Credentials::from_authorization)
        .or_else(|| query_token.map(Credentials::bearer))
        .ok_or(AuthError::MissingCredentials)?;

    state.authenticator.verify(&credentials)
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Identity,
    format: WireFormat,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    let (sender, mut receiver) = socket.split();
    let (outbox, inbox) = mpsc::channel(state.config.limits.outbox_capacity);

    if let Err(e) = state.hub.on_connect(connection_id.clone(), identity, outbox) {
        warn!(connection = %connection_id, error = %e, "Connection rejected by hub");
        return;
    }
    debug!(connection = %connection_id, ?format, "WebSocket connected");

    let mut writer = tokio::spawn(write_loop(sender, inbox, format, connection_id.clone()));

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(connection = %connection_id, "Writer finished");
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => handle_event(&state, &connection_id, event).await,
                            Err(e) => {
                                warn!(
                                    connection = %connection_id,
                                    error = %e,
                                    "Undecodable text frame"
                                );
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => {
                                    handle_event(&state, &connection_id, event).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(
                                        connection = %connection_id,
                                        error = %e,
                                        "Undecodable binary frame"
                                    );
                                    metrics::record_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pongs are queued by the WebSocket layer
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.hub.on_disconnect(&connection_id);
    writer.abort();

    metrics::set_active_rooms(state.hub.registry().room_count());
    metrics::record_delivery_totals(state.hub.engine().totals());
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Dispatch one decoded client event.
async fn handle_event(state: &AppState, connection_id: &ConnectionId, event: ClientEvent) {
    let start = Instant::now();
    let name = event.name();
    metrics::record_inbound(name);

    if let Err(e) = state.hub.dispatch(connection_id, event).await {
        warn!(connection = %connection_id, event = name, error = %e, "Event rejected");
        metrics::record_error(error_type(&e));
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    metrics::set_active_rooms(state.hub.registry().room_count());
    metrics::record_delivery_totals(state.hub.engine().totals());
}

fn error_type(error: &HubError) -> &'static str {
    match error {
        HubError::Unauthenticated => "unauthenticated",
        HubError::Room(_) | HubError::NotInRoom(_) => "validation",
        HubError::Store(_) => "store",
    }
}

/// Drain a connection's outbox onto its socket.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut inbox: mpsc::Receiver<Arc<ServerEvent>>,
    format: WireFormat,
    connection_id: ConnectionId,
) {
    while let Some(event) = inbox.recv().await {
        let frame = match format.encode(event.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    connection = %connection_id,
                    event = event.name(),
                    error = %e,
                    "Encode failed"
                );
                metrics::record_error("encode");
                continue;
            }
        };

        metrics::record_outbound(frame.len());
        let message = match frame {
            Encoded::Text(text) => Message::Text(text),
            Encoded::Binary(data) => Message::Binary(data.to_vec()),
        };

        if let Err(e) = sender.send(message).await {
            debug!(connection = %connection_id, error = %e, "Socket write failed");
            break;
        }
    }

    let _ = sender.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::token_for;
    use futures_util::{SinkExt, StreamExt};
    use knox_core::InMemoryMessageStore;
    use knox_protocol::{ChatEntry, PROTOCOL_VERSION};
    use std::net::SocketAddr;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    const SECRET: &str = "test-secret";

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(
            config,
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(JwtAuthenticator::new(SECRET)),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    async fn connect(addr: SocketAddr, nickname: &str) -> Client {
        let token = token_for(SECRET, nickname, 3600);
        let (client, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
            .await
            .unwrap();
        client
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        loop {
            match client.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return codec::decode_json(&text).unwrap(),
                WsMessage::Binary(data) => return codec::decode(&data[4..]).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send(client: &mut Client, event: &ClientEvent) {
        let text = codec::encode_json(event).unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_and_chat_over_websocket() {
        let (addr, state) = spawn_server(Config::default()).await;

        let mut alice = connect(addr, "alice").await;
        match next_event(&mut alice).await {
            ServerEvent::Connected { nickname, version, .. } => {
                assert_eq!(nickname, "alice");
                assert_eq!(version, PROTOCOL_VERSION);
            }
            other => panic!("Expected connected, got {:?}", other),
        }

        send(&mut alice, &ClientEvent::join("lobby")).await;
        assert_eq!(next_event(&mut alice).await, ServerEvent::LoadHistory(vec![]));
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::info("alice has entered the room. Say Hello!")
        );

        send(&mut alice, &ClientEvent::message("lobby", "hi", "T1")).await;
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::ChatMessage(ChatEntry {
                nickname: "alice".into(),
                message: "hi".into(),
                timestamp: "T1".into(),
            })
        );
        assert_eq!(state.hub.registry().room_count(), 1);
    }

    #[tokio::test]
    async fn test_msgpack_connection() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let token = token_for(SECRET, "bob", 3600);
        let (mut bob, _) = connect_async(format!("ws://{}/ws?format=msgpack&token={}", addr, token))
            .await
            .unwrap();

        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::Connected { .. }
        ));

        let frame = codec::encode(&ClientEvent::join("lobby")).unwrap();
        bob.send(WsMessage::Binary(frame.to_vec())).await.unwrap();
        assert_eq!(next_event(&mut bob).await, ServerEvent::LoadHistory(vec![]));
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (addr, state) = spawn_server(Config::default()).await;

        let result = connect_async(format!("ws://{}/ws", addr)).await;
        match result {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED.as_u16());
            }
            other => panic!("Expected HTTP 401, got {:?}", other.map(|_| ())),
        }
        assert_eq!(state.hub.connection_count(), 0);
        assert_eq!(state.slots.in_use(), 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let (addr, _state) = spawn_server(config).await;

        let mut alice = connect(addr, "alice").await;
        next_event(&mut alice).await;

        let token = token_for(SECRET, "bob", 3600);
        match connect_async(format!("ws://{}/ws?token={}", addr, token)).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE.as_u16());
            }
            other => panic!("Expected HTTP 503, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upgrades_respect_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 3;
        let (addr, state) = spawn_server(config).await;

        let mut attempts = Vec::new();
        for i in 0..12 {
            let token = token_for(SECRET, &format!("user-{}", i), 3600);
            let url = format!("ws://{}/ws?token={}", addr, token);
            attempts.push(tokio::spawn(async move { connect_async(url).await }));
        }

        let mut admitted = Vec::new();
        let mut refused = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok((client, _)) => admitted.push(client),
                Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE.as_u16());
                    refused += 1;
                }
                Err(e) => panic!("Unexpected connect error: {}", e),
            }
        }

        assert_eq!(admitted.len(), 3);
        assert_eq!(refused, 9);
        assert_eq!(state.slots.in_use(), 3);
    }

    #[test]
    fn test_slots_are_bounded_and_released() {
        let slots = Arc::new(ConnectionSlots::new(4));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let slots = Arc::clone(&slots);
                std::thread::spawn(move || slots.try_acquire())
            })
            .collect();
        let held: Vec<ConnectionSlot> = handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(held.len(), 4);
        assert_eq!(slots.in_use(), 4);
        assert!(slots.try_acquire().is_none());

        drop(held);
        assert_eq!(slots.in_use(), 0);
        assert!(slots.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_room() {
        let (addr, state) = spawn_server(Config::default()).await;

        let mut alice = connect(addr, "alice").await;
        let mut bob = connect(addr, "bob").await;
        next_event(&mut alice).await;
        next_event(&mut bob).await;

        send(&mut alice, &ClientEvent::join("lobby")).await;
        next_event(&mut alice).await;
        next_event(&mut alice).await;
        send(&mut bob, &ClientEvent::join("lobby")).await;
        next_event(&mut bob).await;
        next_event(&mut bob).await;
        next_event(&mut alice).await;

        bob.close(None).await.unwrap();
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::warning("bob has left the room. Bye bye!")
        );

        alice.close(None).await.unwrap();
        for _ in 0..50 {
            if state.hub.connection_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.hub.connection_count(), 0);
        assert!(!state.hub.registry().room_exists("lobby"));
    }

    #[test]
    fn test_authenticate_prefers_header() {
        let state = AppState::new(
            Config::default(),
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(JwtAuthenticator::new(SECRET)),
        );
        let mut headers = HeaderMap::new();
        let header = format!("Bearer {}", token_for(SECRET, "carol", 3600));
        headers.insert(AUTHORIZATION, header.parse().unwrap());

        let identity =
            authenticate(&state, &headers, Some(token_for(SECRET, "mallory", 3600))).unwrap();
        assert_eq!(identity.as_str(), "carol");

        assert_eq!(
            authenticate(&state, &HeaderMap::new(), None),
            Err(AuthError::MissingCredentials)
        );
    }
}
