//! Per-tenant broadcast hub
//!
//! A single event-loop task owns the client map and serializes every
//! mutation and fan-out, so `register`/`unregister`/`broadcast` always
//! observe a consistent view without locks. Clients are values owned by
//! the hub; the connection tasks only hold an id and the receiving end
//! of a bounded outbound queue.
//!
//! ## Backpressure
//!
//! Fan-out enqueues are non-blocking. A client whose queue is full is
//! evicted (its queue sender is dropped, which ends its writer loop);
//! the message is never dropped for the other clients of the account.
//!
//! ## Isolation
//!
//! A client registered under account `A` is only ever handed messages
//! tagged `A`.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::WsMessage;

/// Outbound queue capacity per client.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the hub's inbound channels.
const HUB_CHANNEL_CAPACITY: usize = 64;

/// What a connection task gets back from `register`.
pub struct ClientRegistration {
    pub client_id: u64,
    pub account_id: String,

    /// Serialized frames to forward to the socket. Closed when the hub
    /// evicts or unregisters the client.
    pub outbound: mpsc::Receiver<String>,
}

struct RegisterRequest {
    account_id: String,
    via_share_token: bool,
    respond_to: oneshot::Sender<ClientRegistration>,
}

struct UnregisterRequest {
    account_id: String,
    client_id: u64,
}

/// Hub-owned per-client state.
struct Client {
    sender: mpsc::Sender<String>,
    via_share_token: bool,
}

/// The event-loop actor. Owns the client map exclusively.
struct Hub {
    clients: HashMap<String, HashMap<u64, Client>>,
    next_client_id: u64,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    broadcast_rx: mpsc::Receiver<WsMessage>,
}

impl Hub {
    async fn run(mut self) {
        debug!("broadcast hub started");

        loop {
            tokio::select! {
                Some(req) = self.register_rx.recv() => {
                    self.handle_register(req);
                }

                Some(req) = self.unregister_rx.recv() => {
                    self.remove_client(&req.account_id, req.client_id);
                }

                Some(msg) = self.broadcast_rx.recv() => {
                    self.fan_out(msg);
                }

                // All handles dropped.
                else => break,
            }
        }

        debug!("broadcast hub stopped");
    }

    fn handle_register(&mut self, req: RegisterRequest) {
        self.next_client_id += 1;
        let client_id = self.next_client_id;

        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.entry(req.account_id.clone()).or_default().insert(
            client_id,
            Client {
                sender: tx,
                via_share_token: req.via_share_token,
            },
        );

        trace!(
            "registered client {} for account {} (share token: {})",
            client_id, req.account_id, req.via_share_token
        );

        // The connection task may already be gone; drop the entry again
        // rather than leaving a dead client behind.
        let registration = ClientRegistration {
            client_id,
            account_id: req.account_id.clone(),
            outbound: rx,
        };
        if req.respond_to.send(registration).is_err() {
            self.remove_client(&req.account_id, client_id);
        }
    }

    fn remove_client(&mut self, account_id: &str, client_id: u64) {
        if let Some(account_clients) = self.clients.get_mut(account_id) {
            // Dropping the sender closes the client's outbound queue and
            // releases its writer loop. Unregister for an already-removed
            // client is a no-op, so both connection loops may report exit.
            if account_clients.remove(&client_id).is_some() {
                trace!("unregistered client {} for account {}", client_id, account_id);
            }
            if account_clients.is_empty() {
                self.clients.remove(account_id);
            }
        }
    }

    fn fan_out(&mut self, msg: WsMessage) {
        let Some(account_clients) = self.clients.get(&msg.account_id) else {
            return;
        };

        // Serialize once per broadcast, not per client.
        let frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping unserializable broadcast: {}", e);
                return;
            }
        };

        let mut evicted = Vec::new();
        for (client_id, client) in account_clients {
            match client.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "client {} of account {} cannot keep up (share token: {}), evicting",
                        client_id, msg.account_id, client.via_share_token
                    );
                    evicted.push(*client_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*client_id);
                }
            }
        }

        for client_id in evicted {
            self.remove_client(&msg.account_id, client_id);
        }
    }
}

/// Handle for talking to the hub's event loop.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    broadcast_tx: mpsc::Sender<WsMessage>,
}

impl HubHandle {
    /// Spawn the hub event loop and return a handle to it.
    pub fn spawn() -> Self {
        let (register_tx, register_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);

        let hub = Hub {
            clients: HashMap::new(),
            next_client_id: 0,
            register_rx,
            unregister_rx,
            broadcast_rx,
        };

        tokio::spawn(hub.run());

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
        }
    }

    /// Register a new client and receive its outbound queue.
    pub async fn register(
        &self,
        account_id: impl Into<String>,
        via_share_token: bool,
    ) -> anyhow::Result<ClientRegistration> {
        let (tx, rx) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest {
                account_id: account_id.into(),
                via_share_token,
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("broadcast hub is down"))?;

        rx.await.map_err(|_| anyhow::anyhow!("broadcast hub dropped registration"))
    }

    /// Remove a client. Safe to call more than once for the same client.
    pub async fn unregister(&self, account_id: impl Into<String>, client_id: u64) {
        let _ = self
            .unregister_tx
            .send(UnregisterRequest {
                account_id: account_id.into(),
                client_id,
            })
            .await;
    }

    /// Queue a message for every client of `msg.account_id`.
    ///
    /// Delivery is best-effort per client; within one client, frames
    /// arrive in the order broadcasts were accepted here.
    pub async fn broadcast(&self, msg: WsMessage) -> anyhow::Result<()> {
        self.broadcast_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("broadcast hub is down"))
    }
}
