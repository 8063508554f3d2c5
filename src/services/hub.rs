//! Per-transaction real-time sessions.
//!
//! Every transaction id maps to one session holding the connected client
//! handles watching it and the last status event published for it. A
//! session's members and last event only change under that session's
//! mutex, so publishes to one session reach each member in call order.
//!
//! Sessions without members are parked in a `moka` cache with a time to
//! live instead of being dropped, so a client that reconnects within the
//! window still gets the last event replayed. The registry lock is always
//! taken before a session lock.

use crate::error::WalletError;
use crate::models::{PaymentStatusEvent, SessionEvent};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use uuid::Uuid;

pub type ClientId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// The hub's view of one client connection: where to push its events and
/// whether its transport is up.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    sender: mpsc::Sender<SessionEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ClientHandle {
    /// Creates a handle in `Connecting` state plus the receiving end of its
    /// event queue.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let handle = Self {
            id: Uuid::new_v4(),
            sender,
            state: Arc::new(state),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && !self.sender.is_closed()
    }

    pub fn mark_connected(&self) {
        self.state.send_replace(ConnectionState::Connected);
    }

    pub fn mark_disconnected(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn deliver(&self, event: SessionEvent) -> Result<(), TrySendError<SessionEvent>> {
        if self.state() == ConnectionState::Disconnected {
            return Err(TrySendError::Closed(event));
        }
        self.sender.try_send(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { replayed: bool },
    AlreadyJoined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub active_sessions: usize,
    pub idle_sessions: u64,
    pub members: usize,
}

#[derive(Default)]
struct Session {
    members: HashMap<ClientId, ClientHandle>,
    last_known: Option<PaymentStatusEvent>,
}

impl Session {
    /// Pushes `event` to every member. Closed members are dropped; members
    /// with a full queue are marked disconnected and dropped too.
    fn fan_out(&mut self, transaction_id: Uuid, event: &PaymentStatusEvent) -> usize {
        let mut delivered = 0;
        self.members.retain(|client_id, handle| {
            let message = SessionEvent {
                transaction_id,
                event: event.clone(),
            };
            match handle.deliver(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    // A member that fell behind is cut off rather than left
                    // joined with a gap; its socket closes on the state change
                    // and a rejoin replays the latest event.
                    handle.mark_disconnected();
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        client_id = %client_id,
                        "Session member queue full; disconnecting"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        transaction_id = %transaction_id,
                        client_id = %client_id,
                        "Dropping disconnected session member"
                    );
                    false
                }
            }
        });
        delivered
    }
}

type SessionRef = Arc<Mutex<Session>>;

pub struct NotificationHub {
    active: RwLock<HashMap<Uuid, SessionRef>>,
    idle: Cache<Uuid, SessionRef>,
}

impl NotificationHub {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            idle: Cache::builder().time_to_live(idle_ttl).build(),
        }
    }

    /// Adds `client` to the transaction's session and replays the last
    /// known event to it. The client's transport must already be connected.
    pub async fn join(
        &self,
        transaction_id: Uuid,
        client: &ClientHandle,
    ) -> Result<JoinOutcome, WalletError> {
        if !client.is_connected() {
            return Err(WalletError::SessionNotReady(format!(
                "client {} is {:?}",
                client.id(),
                client.state()
            )));
        }

        let mut active = self.active.write().await;
        let session = match active.get(&transaction_id) {
            Some(session) => session.clone(),
            None => {
                let session = match self.idle.remove(&transaction_id).await {
                    Some(parked) => parked,
                    None => SessionRef::default(),
                };
                active.insert(transaction_id, session.clone());
                session
            }
        };

        let mut session = session.lock().await;
        if session.members.contains_key(&client.id()) {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let replayed = match session.last_known.clone() {
            Some(event) => {
                let replay = SessionEvent {
                    transaction_id,
                    event,
                };
                if client.deliver(replay).is_err() {
                    let empty = session.members.is_empty();
                    drop(session);
                    if empty {
                        self.park(&mut active, transaction_id).await;
                    }
                    return Err(WalletError::SessionNotReady(format!(
                        "client {} stopped accepting events",
                        client.id()
                    )));
                }
                true
            }
            None => false,
        };

        session.members.insert(client.id(), client.clone());
        tracing::debug!(
            transaction_id = %transaction_id,
            client_id = %client.id(),
            members = session.members.len(),
            replayed,
            "Client joined session"
        );

        Ok(JoinOutcome::Joined { replayed })
    }

    /// Removes `client_id` from the session. Returns whether it was a member.
    pub async fn leave(&self, transaction_id: Uuid, client_id: ClientId) -> bool {
        let mut active = self.active.write().await;
        let Some(session) = active.get(&transaction_id).cloned() else {
            return false;
        };

        let mut session = session.lock().await;
        let was_member = session.members.remove(&client_id).is_some();
        let empty = session.members.is_empty();
        drop(session);

        if empty {
            self.park(&mut active, transaction_id).await;
        }

        if was_member {
            tracing::debug!(
                transaction_id = %transaction_id,
                client_id = %client_id,
                "Client left session"
            );
        }
        was_member
    }

    /// Leaves every listed session; used when a connection goes away.
    pub async fn leave_all(&self, client_id: ClientId, transaction_ids: impl IntoIterator<Item = Uuid>) {
        for transaction_id in transaction_ids {
            self.leave(transaction_id, client_id).await;
        }
    }

    /// Records `event` as the session's last known status and pushes it to
    /// every member. Returns how many members received it.
    pub async fn publish(&self, transaction_id: Uuid, event: PaymentStatusEvent) -> usize {
        let (delivered, emptied) = {
            let active = self.active.read().await;
            let session = match active.get(&transaction_id) {
                Some(session) => Some(session.clone()),
                None => self.idle.get(&transaction_id).await,
            };

            match session {
                Some(session) => {
                    let mut session = session.lock().await;
                    session.last_known = Some(event.clone());
                    let had_members = !session.members.is_empty();
                    let delivered = session.fan_out(transaction_id, &event);
                    (delivered, had_members && session.members.is_empty())
                }
                None => {
                    drop(active);
                    self.publish_to_new(transaction_id, event).await;
                    return 0;
                }
            }
        };

        if emptied {
            let mut active = self.active.write().await;
            let still_empty = match active.get(&transaction_id) {
                Some(session) => session.lock().await.members.is_empty(),
                None => false,
            };
            if still_empty {
                self.park(&mut active, transaction_id).await;
            }
        }

        tracing::info!(
            transaction_id = %transaction_id,
            delivered,
            "Published payment status"
        );
        delivered
    }

    /// Nobody has watched this transaction yet: park a session holding the
    /// event so the first joiner gets it replayed.
    async fn publish_to_new(&self, transaction_id: Uuid, event: PaymentStatusEvent) {
        let active = self.active.write().await;
        let existing = match active.get(&transaction_id) {
            Some(session) => Some(session.clone()),
            None => self.idle.get(&transaction_id).await,
        };

        match existing {
            Some(session) => {
                let mut session = session.lock().await;
                session.last_known = Some(event.clone());
                session.fan_out(transaction_id, &event);
            }
            None => {
                let session = Session {
                    members: HashMap::new(),
                    last_known: Some(event),
                };
                self.idle
                    .insert(transaction_id, Arc::new(Mutex::new(session)))
                    .await;
            }
        }

        tracing::info!(transaction_id = %transaction_id, "Published payment status to unwatched session");
    }

    async fn park(&self, active: &mut HashMap<Uuid, SessionRef>, transaction_id: Uuid) {
        if let Some(session) = active.remove(&transaction_id) {
            self.idle.insert(transaction_id, session).await;
            tracing::debug!(transaction_id = %transaction_id, "Session idle");
        }
    }

    pub async fn last_known(&self, transaction_id: Uuid) -> Option<PaymentStatusEvent> {
        let active = self.active.read().await;
        let session = match active.get(&transaction_id) {
            Some(session) => session.clone(),
            None => self.idle.get(&transaction_id).await?,
        };
        let session = session.lock().await;
        session.last_known.clone()
    }

    pub async fn is_member(&self, transaction_id: Uuid, client_id: ClientId) -> bool {
        let active = self.active.read().await;
        match active.get(&transaction_id) {
            Some(session) => session.lock().await.members.contains_key(&client_id),
            None => false,
        }
    }

    pub async fn stats(&self) -> HubStats {
        self.idle.run_pending_tasks().await;
        let active = self.active.read().await;
        let mut members = 0;
        for session in active.values() {
            members += session.lock().await.members.len();
        }
        HubStats {
            active_sessions: active.len(),
            idle_sessions: self.idle.entry_count(),
            members,
        }
    }
}
