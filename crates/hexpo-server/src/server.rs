//! WebSocket server and connection handling.

use crate::protocol::{ClientMessage, ServerMessage};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use hexpo_core::{Game, GameError, PlayerId, PlayerMetadata};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a client request was refused
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Join the game first")]
    NotJoined,

    #[error("Connection already plays as {0}")]
    AlreadyBound(PlayerId),

    #[error(transparent)]
    Game(#[from] GameError),
}

impl SessionError {
    /// Stable code sent in `Rejected`
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotJoined => "not_joined",
            SessionError::AlreadyBound(_) => "already_bound",
            SessionError::Game(e) => e.code(),
        }
    }
}

/// One open WebSocket connection
pub struct Connection {
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    /// Player this connection acts for, once joined
    pub player: Option<PlayerId>,
    /// Task forwarding the event log, if subscribed
    pub subscription: Option<JoinHandle<()>>,
}

/// Server state shared across all connections.
pub struct ServerState {
    pub game: Arc<Game>,
    pub connections: DashMap<Uuid, Connection>,
    /// Wakes the scheduler when every eligible player has submitted
    pub quorum: Notify,
    /// Last published event sequence number
    last_seq: watch::Sender<u64>,
}

impl ServerState {
    pub fn new(game: Arc<Game>) -> Self {
        let (last_seq, _) = watch::channel(game.events().last_seq());
        Self {
            game,
            connections: DashMap::new(),
            quorum: Notify::new(),
            last_seq,
        }
    }

    /// Register a connection's outgoing channel.
    pub fn connect(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.connections.insert(
            connection_id,
            Connection {
                sender,
                player: None,
                subscription: None,
            },
        );
    }

    /// Drop a connection and stop its event forwarding.
    pub fn disconnect(&self, connection_id: Uuid) {
        if let Some((_, conn)) = self.connections.remove(&connection_id) {
            if let Some(task) = conn.subscription {
                task.abort();
            }
        }
    }

    /// Send a message to a specific connection; false if it is gone.
    pub fn send_to(&self, connection_id: Uuid, msg: ServerMessage) -> bool {
        match self.connections.get(&connection_id) {
            Some(conn) => conn.sender.send(msg).is_ok(),
            None => false,
        }
    }

    /// Wake subscribers after the event log grew.
    pub fn notify_events(&self) {
        self.last_seq.send_replace(self.game.events().last_seq());
    }

    fn bound_player(&self, connection_id: Uuid) -> Option<PlayerId> {
        self.connections
            .get(&connection_id)
            .and_then(|conn| conn.player.clone())
    }

    /// Start forwarding events from `from_seq`, replacing any earlier subscription.
    fn subscribe(self: &Arc<Self>, connection_id: Uuid, from_seq: u64) {
        let mut seq_rx = self.last_seq.subscribe();
        let state = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut next = from_seq.max(1);
            loop {
                for event in state.game.events_since(next) {
                    next = event.seq + 1;
                    if !state.send_to(connection_id, ServerMessage::Event { event }) {
                        return;
                    }
                }
                if seq_rx.changed().await.is_err() {
                    return;
                }
            }
        });

        let previous = match self.connections.get_mut(&connection_id) {
            Some(mut conn) => conn.subscription.replace(task),
            None => {
                task.abort();
                None
            }
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

/// Run the WebSocket server until `shutdown` flips.
pub async fn run_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Hexpo server listening on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr, state).await {
                        error!("Connection error from {}: {}", peer_addr, e);
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("Server stopped accepting connections");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let connection_id = Uuid::new_v4();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.connect(connection_id, tx);

    let welcome = ServerMessage::Welcome { connection_id };
    ws_sender
        .send(Message::Text(serde_json::to_string(&welcome)?.into()))
        .await?;

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_message(connection_id, client_msg, &state),
                Err(e) => {
                    warn!("Invalid message from {}: {}", connection_id, e);
                    state.send_to(
                        connection_id,
                        ServerMessage::Error {
                            message: e.to_string(),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", connection_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    state.disconnect(connection_id);
    send_task.abort();

    info!("Connection closed for {}", connection_id);
    Ok(())
}

/// Handle a client message.
pub fn handle_message(connection_id: Uuid, msg: ClientMessage, state: &Arc<ServerState>) {
    let reply = match dispatch(connection_id, msg, state) {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            debug!("Rejected request from {}: {}", connection_id, e);
            ServerMessage::Rejected {
                code: e.code().to_string(),
                message: e.to_string(),
            }
        }
    };
    state.send_to(connection_id, reply);
}

fn dispatch(
    connection_id: Uuid,
    msg: ClientMessage,
    state: &Arc<ServerState>,
) -> Result<Option<ServerMessage>, SessionError> {
    let game = &state.game;
    match msg {
        ClientMessage::Join { player_id, name } => {
            if let Some(bound) = state.bound_player(connection_id) {
                return Err(SessionError::AlreadyBound(bound));
            }
            let player = game.join_player(PlayerId::new(player_id), PlayerMetadata::new(name))?;
            if let Some(mut conn) = state.connections.get_mut(&connection_id) {
                conn.player = Some(player.id.clone());
            }
            state.notify_events();
            Ok(Some(ServerMessage::Joined { player }))
        }

        ClientMessage::Submit { target, kind } => {
            let player = state
                .bound_player(connection_id)
                .ok_or(SessionError::NotJoined)?;
            let action = game.submit_action(player, target, kind, game.now())?;
            if game.quorum_reached() {
                state.quorum.notify_one();
            }
            Ok(Some(ServerMessage::Accepted { action }))
        }

        ClientMessage::Snapshot => Ok(Some(ServerMessage::Snapshot {
            turn: game.current_step().turn,
            tiles: game.grid_snapshot().tiles().collect(),
        })),

        ClientMessage::CurrentStep => {
            let info = game.current_step();
            let time_left = info.time_left_display(game.now());
            Ok(Some(ServerMessage::Step { info, time_left }))
        }

        ClientMessage::Subscribe { from_seq } => {
            state.subscribe(connection_id, from_seq);
            Ok(None)
        }

        ClientMessage::Standings => Ok(Some(ServerMessage::Standings {
            standings: game.standings(),
        })),

        ClientMessage::Ping => Ok(Some(ServerMessage::Pong)),
    }
}
