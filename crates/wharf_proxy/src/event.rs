//! Plugin-facing hooks.
//!
//! The proxy core calls these at fixed points in the session state
//! machine. Implementations run on the session's task, so they must not
//! block; anything expensive belongs on a spawned task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

pub use async_trait::async_trait;
use wharf_protocol::packets::HandshakeC2s;
use wharf_protocol::{GameProfile, Text};

use crate::ping::StatusResponse;

/// The outcome of [`ProxyCallbacks::on_server_pre_connect`].
#[derive(Clone, Default, Debug)]
pub enum PreConnectResult {
    /// Connect to the server the core chose.
    #[default]
    Allow,
    /// Connect somewhere else instead.
    Redirect(String),
    /// Abort the connection attempt.
    Deny,
}

/// Observer hooks invoked synchronously relative to each session's state
/// machine. All methods have default no-op implementations.
///
/// This trait uses [`mod@async_trait`].
#[async_trait]
pub trait ProxyCallbacks: Send + Sync + 'static {
    /// Called after the handshake packet is read. Returning `false`
    /// closes the connection without feedback.
    async fn on_handshake(&self, remote: SocketAddr, handshake: &HandshakeC2s) -> bool {
        let _ = (remote, handshake);
        true
    }

    /// Called once a profile is established, before registry admission.
    /// Returning `Err(reason)` kicks the client with that reason.
    async fn on_login(&self, remote: SocketAddr, profile: &GameProfile) -> Result<(), Text> {
        let _ = (remote, profile);
        Ok(())
    }

    /// Called before each backend connection attempt (initial join and
    /// switches).
    async fn on_server_pre_connect(&self, profile: &GameProfile, server: &str) -> PreConnectResult {
        let _ = (profile, server);
        PreConnectResult::Allow
    }

    /// Called after a backend link reaches the play state.
    async fn on_server_connected(&self, profile: &GameProfile, server: &str) {
        let _ = (profile, server);
    }

    /// Called exactly once per admitted session, on teardown.
    async fn on_disconnect(&self, profile: &GameProfile) {
        let _ = profile;
    }

    /// Called for plugin messages crossing the relay. Observation only;
    /// the frame is forwarded regardless.
    async fn on_plugin_message(&self, profile: &GameProfile, channel: &str) {
        let _ = (profile, channel);
    }

    /// Called with the assembled status document before serialization.
    /// Observers may rewrite it freely.
    async fn on_ping(&self, remote: SocketAddr, response: &mut StatusResponse) {
        let _ = (remote, response);
    }

    /// Called on every online-mode login to obtain the full URL for the
    /// session-service `hasJoined` request. The response must match the
    /// documented profile shape (`id`, `name`, `properties`).
    ///
    /// # Default Implementation
    ///
    /// Uses the official Mojang session server.
    async fn session_server(&self, username: &str, auth_digest: &str, player_ip: &IpAddr) -> String {
        let _ = player_ip;

        format!(
            "https://sessionserver.mojang.com/session/minecraft/hasJoined?username={username}&serverId={auth_digest}"
        )
    }
}

/// The default callbacks. Useful as a placeholder.
#[async_trait]
impl ProxyCallbacks for () {}

/// A type-erased, cheaply clonable wrapper around a [`ProxyCallbacks`]
/// object.
#[derive(Clone)]
pub struct ErasedCallbacks {
    pub(crate) inner: Arc<dyn ProxyCallbacks>,
}

impl ErasedCallbacks {
    pub fn new<C: ProxyCallbacks>(callbacks: C) -> Self {
        Self {
            inner: Arc::new(callbacks),
        }
    }
}

impl Default for ErasedCallbacks {
    fn default() -> Self {
        Self {
            inner: Arc::new(()),
        }
    }
}

impl<T: ProxyCallbacks> From<T> for ErasedCallbacks {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
