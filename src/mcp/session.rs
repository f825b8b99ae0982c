//! Session identity, liveness and resource subscriptions.
//!
//! A session is the server-side state of one logical client connection. The
//! stream transport owns exactly one implicit session for the lifetime of the
//! process; the HTTP transport creates one per client and expires it after an
//! idle window.
//!
//! Every session owns an outbound channel. Whatever the transport, frames for
//! the client (replies delivered out-of-band and notifications) are pushed
//! through [`SessionManager::send`]; the transport drains the receiving end.
//!
//! # Locking
//!
//! Sessions and subscriptions live in two [`DashMap`]s. No method holds a
//! guard from one map while locking the other.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::mcp::protocol::OutgoingNotification;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which transport a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Single implicit session over stdin/stdout.
    Stream,
    /// One of many sessions over HTTP.
    Multiplexed,
}

/// Client identity reported by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client name.
    pub name: String,
    /// Client version, if reported.
    pub version: Option<String>,
}

/// A point-in-time view of one session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Identifier.
    pub id: SessionId,
    /// Owning transport.
    pub transport_kind: TransportKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time since the last request.
    pub idle_for: Duration,
    /// Whether `notifications/initialized` was received.
    pub initialized: bool,
    /// Client identity, once known.
    pub client: Option<ClientIdentity>,
    /// Subscribed resource URIs, sorted.
    pub subscriptions: Vec<String>,
}

struct Session {
    transport_kind: TransportKind,
    created_at: DateTime<Utc>,
    last_activity_at: Instant,
    outbound: mpsc::UnboundedSender<String>,
    /// Receiving end kept until a transport claims it.
    parked_events: Option<mpsc::UnboundedReceiver<String>>,
    initialized: bool,
    client: Option<ClientIdentity>,
    subscriptions: HashSet<String>,
}

/// Tracks all live sessions and their subscriptions.
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    /// Resource URI to subscribed sessions. URIs without subscribers are removed.
    subscriptions: DashMap<String, HashSet<SessionId>>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session and returns its id with the receiving end of its
    /// outbound channel.
    pub fn open(&self, transport_kind: TransportKind) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(transport_kind, tx, None);
        (id, rx)
    }

    /// Opens a session whose outbound receiver is held until a transport
    /// claims it with [`Self::claim_events`].
    pub fn open_parked(&self, transport_kind: TransportKind) -> SessionId {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(transport_kind, tx, Some(rx))
    }

    fn insert(
        &self,
        transport_kind: TransportKind,
        outbound: mpsc::UnboundedSender<String>,
        parked_events: Option<mpsc::UnboundedReceiver<String>>,
    ) -> SessionId {
        let id = SessionId::generate();
        self.sessions.insert(
            id.clone(),
            Session {
                transport_kind,
                created_at: Utc::now(),
                last_activity_at: Instant::now(),
                outbound,
                parked_events,
                initialized: false,
                client: None,
                subscriptions: HashSet::new(),
            },
        );
        info!(session = %id, kind = ?transport_kind, "Session opened");
        id
    }

    /// Takes the parked outbound receiver of a session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionNotFound`] for unknown sessions and
    /// [`TransportError::Closed`] if the receiver was already claimed.
    pub fn claim_events(
        &self,
        id: &SessionId,
    ) -> Result<mpsc::UnboundedReceiver<String>, TransportError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| TransportError::SessionNotFound(id.to_string()))?;
        session.last_activity_at = Instant::now();
        session
            .parked_events
            .take()
            .ok_or_else(|| TransportError::Closed(id.to_string()))
    }

    /// Returns `true` if the session exists.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Records activity. Returns `false` if the session no longer exists.
    pub fn touch(&self, id: &SessionId) -> bool {
        self.sessions.get_mut(id).map_or(false, |mut session| {
            session.last_activity_at = Instant::now();
            true
        })
    }

    /// Records the client identity reported by `initialize`.
    pub fn set_client(&self, id: &SessionId, client: ClientIdentity) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.client = Some(client);
        }
    }

    /// Marks the session as initialized.
    pub fn mark_initialized(&self, id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.initialized = true;
        }
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(id).map(|session| {
            let mut subscriptions: Vec<String> = session.subscriptions.iter().cloned().collect();
            subscriptions.sort();
            SessionSnapshot {
                id: id.clone(),
                transport_kind: session.transport_kind,
                created_at: session.created_at,
                idle_for: session.last_activity_at.elapsed(),
                initialized: session.initialized,
                client: session.client.clone(),
                subscriptions,
            }
        })
    }

    /// Pushes one frame to the session's client.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is gone or its transport stopped
    /// draining the channel.
    pub fn send(&self, id: &SessionId, frame: String) -> Result<(), TransportError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| TransportError::SessionNotFound(id.to_string()))?;
        session
            .outbound
            .send(frame)
            .map_err(|_| TransportError::Closed(id.to_string()))
    }

    /// Closes a session and drops all its subscriptions.
    ///
    /// Returns `false` if the session did not exist.
    pub fn close(&self, id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        for uri in &session.subscriptions {
            self.remove_subscriber(uri, id);
        }
        info!(session = %id, "Session closed");
        true
    }

    /// Expires multiplexed sessions idle for at least `idle`.
    ///
    /// Stream sessions never expire. Returns the expired ids.
    pub fn expire_idle(&self, idle: Duration) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.transport_kind == TransportKind::Multiplexed
                    && entry.last_activity_at.elapsed() >= idle
            })
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter(|id| {
                let closed = self.close(id);
                if closed {
                    info!(session = %id, "Session expired after idle timeout");
                }
                closed
            })
            .collect()
    }

    /// Subscribes a session to change notifications for `uri`.
    ///
    /// Returns `true` if the subscription is new; repeating it is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionNotFound`] for unknown sessions.
    pub fn subscribe(&self, id: &SessionId, uri: &str) -> Result<bool, TransportError> {
        let added = {
            let mut session = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| TransportError::SessionNotFound(id.to_string()))?;
            session.subscriptions.insert(uri.to_string())
        };
        if added {
            self.subscriptions
                .entry(uri.to_string())
                .or_default()
                .insert(id.clone());
            debug!(session = %id, uri, "Subscribed");
        }
        Ok(added)
    }

    /// Removes a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: &SessionId, uri: &str) -> bool {
        let removed = self
            .sessions
            .get_mut(id)
            .map_or(false, |mut session| session.subscriptions.remove(uri));
        if removed {
            self.remove_subscriber(uri, id);
            debug!(session = %id, uri, "Unsubscribed");
        }
        removed
    }

    fn remove_subscriber(&self, uri: &str, id: &SessionId) {
        if let Some(mut subscribers) = self.subscriptions.get_mut(uri) {
            subscribers.remove(id);
        }
        self.subscriptions.remove_if(uri, |_, subscribers| subscribers.is_empty());
    }

    /// Sessions currently subscribed to `uri`, sorted.
    #[must_use]
    pub fn subscribers(&self, uri: &str) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .subscriptions
            .get(uri)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of URIs with at least one subscriber.
    #[must_use]
    pub fn subscribed_uri_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Sends `notifications/resources/updated` for `uri` to every subscribed
    /// session. Returns the number of sessions reached.
    pub fn notify_resource_updated(&self, uri: &str) -> usize {
        let subscribers = self.subscribers(uri);
        if subscribers.is_empty() {
            return 0;
        }

        let frame = match serde_json::to_string(&OutgoingNotification::resource_updated(uri)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialise resource notification");
                return 0;
            }
        };

        subscribers
            .iter()
            .filter(|id| match self.send(id, frame.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(session = %id, error = %e, "Dropping notification for dead session");
                    false
                }
            })
            .count()
    }
}
