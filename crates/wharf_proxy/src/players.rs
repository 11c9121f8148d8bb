//! The process-wide registry of admitted players.
//!
//! Two indices — by UUID and by lower-cased name — are kept under a single
//! lock so they can never disagree. A session joins the registry exactly
//! once, after a successful login, and leaves it exactly once, when its
//! [`AdmissionGuard`] drops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;
use wharf_protocol::{GameProfile, ProtocolVersion, Text};

/// Instructions another task can inject into a live session.
#[derive(Clone, Debug)]
pub enum ControlMessage {
    /// Disconnect the player with the given reason.
    Kick(Text),
    /// Move the player to another backend.
    Switch { target: String, force: bool },
}

/// The shareable face of a live session.
pub struct SessionHandle {
    pub profile: GameProfile,
    pub remote: SocketAddr,
    pub version: ProtocolVersion,
    control: mpsc::Sender<ControlMessage>,
    current_server: Mutex<Option<String>>,
    pending_switch: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(
        profile: GameProfile,
        remote: SocketAddr,
        version: ProtocolVersion,
        control: mpsc::Sender<ControlMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            profile,
            remote,
            version,
            control,
            current_server: Mutex::new(None),
            pending_switch: AtomicBool::new(false),
        })
    }

    pub fn current_server(&self) -> Option<String> {
        self.current_server.lock().clone()
    }

    pub(crate) fn set_current_server(&self, server: Option<String>) {
        *self.current_server.lock() = server;
    }

    /// Queues a kick. Errors are ignored: a session that is already
    /// tearing down has dropped its receiver.
    pub fn kick(&self, reason: Text) {
        let _ = self.control.try_send(ControlMessage::Kick(reason));
    }

    /// Requests a switch. Fails fast if one is already in flight.
    pub fn request_switch(&self, target: String, force: bool) -> Result<(), SwitchRequestError> {
        if self
            .pending_switch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SwitchRequestError::AlreadyInFlight);
        }

        if self
            .control
            .try_send(ControlMessage::Switch { target, force })
            .is_err()
        {
            self.pending_switch.store(false, Ordering::Release);
            return Err(SwitchRequestError::SessionClosed);
        }

        Ok(())
    }

    /// Clears the single-flight marker once a switch attempt concluded.
    pub(crate) fn finish_switch(&self) {
        self.pending_switch.store(false, Ordering::Release);
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum SwitchRequestError {
    #[error("a server switch is already in flight")]
    AlreadyInFlight,
    #[error("the session is closed")]
    SessionClosed,
}

#[derive(Default)]
struct Indices {
    by_uuid: HashMap<Uuid, Arc<SessionHandle>>,
    by_name: HashMap<String, Arc<SessionHandle>>,
}

/// See the module docs.
#[derive(Default)]
pub struct PlayerRegistry {
    inner: Arc<Mutex<Indices>>,
}

/// Why admission was refused.
#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[error("already connected under the same identity")]
pub struct AlreadyConnected;

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a session under its identity.
    ///
    /// With `kick_existing`, a session already holding the identity is
    /// disconnected and replaced atomically; otherwise a conflict on
    /// either index refuses the newcomer.
    pub fn admit(
        &self,
        handle: Arc<SessionHandle>,
        kick_existing: bool,
        duplicate_reason: Text,
    ) -> Result<AdmissionGuard, AlreadyConnected> {
        let uuid = handle.profile.uuid;
        let name_key = handle.profile.username.to_lowercase();

        let mut inner = self.inner.lock();

        let occupied =
            inner.by_uuid.contains_key(&uuid) || inner.by_name.contains_key(&name_key);

        if occupied {
            if !kick_existing {
                return Err(AlreadyConnected);
            }

            if let Some(existing) = inner.by_uuid.remove(&uuid) {
                inner
                    .by_name
                    .remove(&existing.profile.username.to_lowercase());
                existing.kick(duplicate_reason.clone());
            }
            if let Some(existing) = inner.by_name.remove(&name_key) {
                inner.by_uuid.remove(&existing.profile.uuid);
                existing.kick(duplicate_reason);
            }
        }

        inner.by_uuid.insert(uuid, handle.clone());
        inner.by_name.insert(name_key.clone(), handle.clone());

        Ok(AdmissionGuard {
            registry: self.inner.clone(),
            handle,
            name_key,
        })
    }

    pub fn by_uuid(&self, uuid: Uuid) -> Option<Arc<SessionHandle>> {
        self.inner.lock().by_uuid.get(&uuid).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.inner.lock().by_name.get(&name.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.inner.lock().by_uuid.values().cloned().collect()
    }

    /// The number of admitted players currently on the named backend.
    pub fn count_on(&self, server: &str) -> usize {
        self.inner
            .lock()
            .by_uuid
            .values()
            .filter(|h| h.current_server().as_deref() == Some(server))
            .count()
    }

    pub fn kick_all(&self, reason: &Text) {
        for handle in self.all() {
            handle.kick(reason.clone());
        }
    }
}

/// Removes the session from both indices when dropped, but only while the
/// session still owns its slots — a newer session that replaced this one
/// under kick-existing must not be evicted by the loser's teardown.
pub struct AdmissionGuard {
    registry: Arc<Mutex<Indices>>,
    handle: Arc<SessionHandle>,
    name_key: String,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut inner = self.registry.lock();

        let owns_uuid = inner
            .by_uuid
            .get(&self.handle.profile.uuid)
            .is_some_and(|h| Arc::ptr_eq(h, &self.handle));

        if owns_uuid {
            inner.by_uuid.remove(&self.handle.profile.uuid);
        }

        let owns_name = inner
            .by_name
            .get(&self.name_key)
            .is_some_and(|h| Arc::ptr_eq(h, &self.handle));

        if owns_name {
            inner.by_name.remove(&self.name_key);
        }
    }
}
