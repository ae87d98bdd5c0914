//! WebSocket Ledger Server
//!
//! Async WebSocket server exposing the commit-reveal engine.
//! Handles authentication, request routing and live event feeds.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::events::LedgerEvent;
use crate::game::mines::{DerivationError, RoundParams, RoundRules};
use crate::game::record::GameRecord;
use crate::ledger::error::LedgerError;
use crate::ledger::store::GameStore;
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientEnvelope, ClientMessage, CommitRequest, ErrorCode,
    RequestError, RevealRequest, RoundRequest, ServerEnvelope, ServerError, ServerMessage,
    SubscribeRequest, VerifyRequest,
};
use crate::proof::commitment::{verify_seed_hash, CommitRevealEngine};
use crate::proof::verify::verify_round;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections silent for this long.
    pub idle_timeout: Duration,
    /// Accept commit/reveal without auth when no `AuthConfig` is set.
    pub allow_anonymous_writes: bool,
    /// Largest cell count accepted on derivation requests.
    pub max_grid_size: u32,
    /// Board policy for requests stating a side length.
    pub rules: RoundRules,
    /// Operator token validation; `None` disables `auth`.
    pub auth: Option<AuthConfig>,
    /// Journal file; `None` keeps records in memory only.
    pub journal_path: Option<PathBuf>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            allow_anonymous_writes: false,
            max_grid_size: 10_000,
            rules: RoundRules::default(),
            auth: None,
            journal_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `MINES_*` and `AUTH_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("MINES_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = env_parse::<usize>("MINES_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(secs) = env_parse::<u64>("MINES_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<u32>("MINES_MAX_GRID_SIZE")? {
            config.max_grid_size = max;
        }
        if let Some(side) = env_parse::<u32>("MINES_MIN_BOARD_SIDE")? {
            config.rules.min_side = side;
        }
        if let Some(side) = env_parse::<u32>("MINES_MAX_BOARD_SIDE")? {
            config.rules.max_side = side;
        }
        config.allow_anonymous_writes = std::env::var("MINES_ALLOW_ANONYMOUS_WRITES")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        config.journal_path = std::env::var_os("MINES_JOURNAL_PATH").map(PathBuf::from);

        let auth = AuthConfig::from_env();
        config.auth = auth.is_configured().then_some(auth);

        Ok(config)
    }

    /// Can commit/reveal ever succeed on this server?
    pub fn accepts_writes(&self) -> bool {
        self.auth.is_some() || self.allow_anonymous_writes
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, GameServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| GameServerError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Connected client state.
struct ConnectedClient {
    /// Operator identity (after auth).
    operator: Option<String>,
    /// Connection time.
    connected_at: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The ledger server.
pub struct GameServer<S> {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Commit-reveal engine shared by all connections.
    engine: Arc<CommitRevealEngine<S>>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: GameStore + 'static> GameServer<S> {
    /// Create a server over `engine`.
    pub fn new(config: ServerConfig, engine: Arc<CommitRevealEngine<S>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        if !config.accepts_writes() {
            warn!("No auth configured and anonymous writes disabled: server is read-only");
        }

        Self {
            config: Arc::new(config),
            engine,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Ledger server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let config = self.config.clone();
        let engine = self.engine.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerEnvelope>(64);

            clients.write().await.insert(addr, ConnectedClient {
                operator: None,
                connected_at: Instant::now(),
            });

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut conn = Connection {
                addr,
                config: config.clone(),
                engine,
                clients: clients.clone(),
                sender: msg_tx,
                operator: None,
                subscription: None,
            };

            let idle = tokio::time::sleep(config.idle_timeout);
            tokio::pin!(idle);

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        // Any frame, control frames included, counts as activity
                        if let Some(Ok(_)) = &msg {
                            idle.as_mut().reset(tokio::time::Instant::now() + config.idle_timeout);
                        }

                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientEnvelope::from_json(&text) {
                                    Ok(envelope) => conn.handle_message(envelope).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        conn.send(None, ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidRequest,
                                            format!("Invalid message format: {}", e),
                                        ))).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                conn.send(None, ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidRequest,
                                    "Binary frames are not supported",
                                ))).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut idle => {
                        // Subscribers may legitimately sit silent between events
                        if conn.is_subscribed() {
                            idle.as_mut().reset(tokio::time::Instant::now() + config.idle_timeout);
                            continue;
                        }
                        info!("Closing idle client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        conn.send(None, ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Dropping the connection closes the outgoing queue; let the
            // sender flush what is left
            drop(conn);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender for {} did not drain in time", addr);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    "Client {} cleaned up after {:?}",
                    addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Authenticated operators currently connected.
    pub async fn operators(&self) -> Vec<String> {
        self.clients
            .read()
            .await
            .values()
            .filter_map(|c| c.operator.clone())
            .collect()
    }

    /// Shared engine.
    pub fn engine(&self) -> &Arc<CommitRevealEngine<S>> {
        &self.engine
    }
}

/// Per-connection request handling.
struct Connection<S> {
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    engine: Arc<CommitRevealEngine<S>>,
    clients: Clients,
    sender: mpsc::Sender<ServerEnvelope>,
    operator: Option<String>,
    subscription: Option<JoinHandle<()>>,
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if let Some(task) = self.subscription.take() {
            task.abort();
        }
    }
}

impl<S: GameStore + 'static> Connection<S> {
    async fn send(&self, request_id: Option<String>, message: ServerMessage) {
        let _ = self.sender.send(ServerEnvelope { request_id, message }).await;
    }

    fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn handle_message(&mut self, envelope: ClientEnvelope) {
        let ClientEnvelope { request_id, message } = envelope;

        let reply = match message {
            ClientMessage::Auth(auth) => self.handle_auth(auth).await,
            ClientMessage::Commit(req) => self.handle_commit(req).await,
            ClientMessage::Reveal(req) => self.handle_reveal(req).await,
            ClientMessage::GetRecord { game_id } => {
                let record = self.engine.get_record(&game_id);
                ServerMessage::Record { game_id, record }
            }
            ClientMessage::Verify(req) => self.handle_verify(req),
            ClientMessage::DeriveOutcome(req) => self.handle_derive(req),
            ClientMessage::VerifyRound(req) => self.handle_verify_round(req),
            ClientMessage::Subscribe(req) => {
                // Sends its own reply so it precedes the first event
                return self.handle_subscribe(request_id, req).await;
            }
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        };

        self.send(request_id, reply).await;
    }

    async fn handle_auth(&mut self, auth: AuthRequest) -> ServerMessage {
        let Some(auth_config) = self.config.auth.as_ref() else {
            return ServerMessage::AuthResult(AuthResult {
                success: false,
                subject: None,
                error: Some("authentication not configured".into()),
                server_version: self.config.version.clone(),
            });
        };

        match validate_token(&auth.token, auth_config) {
            Ok(claims) => {
                let operator = claims.operator_id().to_string();
                if let Some(client) = self.clients.write().await.get_mut(&self.addr) {
                    client.operator = Some(operator.clone());
                }
                debug!("Client {} authenticated as {}", self.addr, operator);
                self.operator = Some(operator.clone());

                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    subject: Some(operator),
                    error: None,
                    server_version: self.config.version.clone(),
                })
            }
            Err(e) => {
                warn!("Authentication failed for {}: {}", self.addr, e);
                ServerMessage::Error(ServerError::new(e.code(), e.to_string()))
            }
        }
    }

    /// Identity to record on a write, or why the write is refused.
    fn write_identity(&self) -> Result<Option<String>, ServerError> {
        match (&self.operator, &self.config.auth) {
            (Some(operator), _) => Ok(Some(operator.clone())),
            (None, Some(_)) => Err(ServerError::new(
                ErrorCode::NotAuthenticated,
                "Must authenticate first",
            )),
            (None, None) if self.config.allow_anonymous_writes => Ok(None),
            (None, None) => Err(ServerError::new(ErrorCode::ReadOnly, "Server is read-only")),
        }
    }

    async fn handle_commit(&self, req: CommitRequest) -> ServerMessage {
        let committer = match self.write_identity() {
            Ok(committer) => committer,
            Err(e) => return ServerMessage::Error(e),
        };

        let engine = self.engine.clone();
        let result = tokio::task::spawn_blocking(move || {
            engine.commit_game_as(&req.game_id, req.seed_hash, committer.as_deref())
        })
        .await;

        write_reply(result, |record| ServerMessage::Committed { record })
    }

    async fn handle_reveal(&self, req: RevealRequest) -> ServerMessage {
        if let Err(e) = self.write_identity() {
            return ServerMessage::Error(e);
        }

        let engine = self.engine.clone();
        let result =
            tokio::task::spawn_blocking(move || engine.reveal_game(&req.game_id, &req.server_seed))
                .await;

        write_reply(result, |record| ServerMessage::Revealed { record })
    }

    fn handle_verify(&self, req: VerifyRequest) -> ServerMessage {
        let seed = req.claimed_seed.as_bytes();
        let valid = match (&req.game_id, &req.seed_hash) {
            (Some(game_id), None) => self.engine.verify_game(game_id, seed),
            (None, Some(seed_hash)) => verify_seed_hash(seed, seed_hash),
            _ => {
                return ServerMessage::Error(ServerError::new(
                    ErrorCode::InvalidRequest,
                    "exactly one of game_id and seed_hash is required",
                ))
            }
        };
        ServerMessage::Verified { valid }
    }

    fn handle_derive(&self, req: RoundRequest) -> ServerMessage {
        let result = self
            .round_params(&req)
            .and_then(|params| params.derive(req.server_seed.as_bytes()).map_err(Into::into));

        match result {
            Ok(mines) => ServerMessage::Outcome { mines },
            Err(e) => ServerMessage::Error(ServerError::from(&e)),
        }
    }

    fn handle_verify_round(&self, req: RoundRequest) -> ServerMessage {
        let result = self.round_params(&req).and_then(|params| {
            verify_round(req.server_seed.as_bytes(), &params).map_err(RequestError::from)
        });

        match result {
            Ok(verification) => ServerMessage::RoundVerified {
                seed_hash: verification.seed_hash,
                mines: verification.mines,
                commitment_matches: req
                    .game_id
                    .as_ref()
                    .map(|id| self.engine.verify_game(id, req.server_seed.as_bytes())),
            },
            Err(e) => ServerMessage::Error(ServerError::from(&e)),
        }
    }

    fn round_params(&self, req: &RoundRequest) -> Result<RoundParams, RequestError> {
        let params = req.params(&self.config.rules)?;
        if params.grid_size > self.config.max_grid_size {
            return Err(DerivationError::InvalidParameters {
                grid_size: params.grid_size,
                mine_count: params.mine_count,
            }
            .into());
        }
        Ok(params)
    }

    async fn handle_subscribe(&mut self, request_id: Option<String>, req: SubscribeRequest) {
        // Subscribe before reading the length so nothing at or after
        // `next_sequence` can be missed
        let rx = self.engine.events().subscribe();
        let next_sequence = req
            .from_sequence
            .unwrap_or(self.engine.events().len() as u64);

        // A repeated subscribe restarts the feed at the new position
        if let Some(previous) = self.subscription.take() {
            previous.abort();
        }

        self.send(request_id, ServerMessage::Subscribed { next_sequence }).await;

        self.subscription = Some(tokio::spawn(forward_events(
            self.engine.clone(),
            rx,
            next_sequence,
            self.sender.clone(),
            self.addr,
        )));
        debug!("Client {} subscribed at sequence {}", self.addr, next_sequence);
    }
}

/// Deliver every event with `sequence >= next`, in order, exactly once.
///
/// History and lag gaps are filled from the event log; the broadcast
/// receiver only carries the live tail.
async fn forward_events<S: GameStore + 'static>(
    engine: Arc<CommitRevealEngine<S>>,
    mut rx: broadcast::Receiver<LedgerEvent>,
    mut next: u64,
    sender: mpsc::Sender<ServerEnvelope>,
    addr: SocketAddr,
) {
    loop {
        for event in engine.events().since(next) {
            next = event.sequence + 1;
            if sender.send(ServerMessage::Event(event).into()).await.is_err() {
                return;
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) if event.sequence < next => continue,
                Ok(event) if event.sequence == next => {
                    next += 1;
                    if sender.send(ServerMessage::Event(event).into()).await.is_err() {
                        return;
                    }
                }
                Ok(_) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber {} lagged by {} events, catching up from {}", addr, skipped, next);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

fn write_reply<F>(
    result: Result<Result<GameRecord, LedgerError>, tokio::task::JoinError>,
    ok: F,
) -> ServerMessage
where
    F: FnOnce(GameRecord) -> ServerMessage,
{
    match result {
        Ok(Ok(record)) => ok(record),
        Ok(Err(e)) => ServerMessage::Error(ServerError::from(&e)),
        Err(e) => {
            error!("Ledger task failed: {}", e);
            ServerMessage::Error(ServerError::new(ErrorCode::InternalError, "ledger task failed"))
        }
    }
}
