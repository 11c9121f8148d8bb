#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_import_braces,
    unreachable_pub,
    clippy::dbg_macro
)]

mod backend;
pub mod command;
pub mod config;
pub mod event;
pub mod forward;
mod haproxy;
pub mod lang;
mod login;
mod packet_io;
pub mod ping;
pub mod players;
mod query;
pub mod ratelimit;
mod relay;
pub mod servers;
mod session;
pub mod switch;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};
use wharf_protocol::PacketRegistry;

pub use crate::command::{Command, CommandManager, CommandSource};
pub use crate::config::ProxyConfig;
pub use crate::event::{ErasedCallbacks, PreConnectResult, ProxyCallbacks};
pub use crate::forward::ForwardingMode;
pub use crate::lang::Messages;
pub use crate::ping::{PlayerSampleEntry, StatusResponse};
pub use crate::players::{PlayerRegistry, SessionHandle};
pub use crate::ratelimit::LoginRateLimiter;
pub use crate::servers::{RegisteredBackend, ServerMap};
pub use crate::switch::{request_switch, SwitchError};

/// Hard ceiling on simultaneous connections; closing the semaphore is
/// also the accept loop's shutdown signal.
const MAX_CONNECTIONS: usize = 65536;

/// How long shutdown waits for sessions to tear down before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The session-service HTTP timeout.
const SESSION_SERVICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts live session tasks so shutdown can wait for them.
#[derive(Default)]
struct ActiveSessions {
    count: AtomicUsize,
    idle: Notify,
}

impl ActiveSessions {
    fn track(self: &Arc<Self>) -> SessionTrackerGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        SessionTrackerGuard(self.clone())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct SessionTrackerGuard(Arc<ActiveSessions>);

impl Drop for SessionTrackerGuard {
    fn drop(&mut self) {
        self.0.count.fetch_sub(1, Ordering::AcqRel);
        self.0.idle.notify_waiters();
    }
}

/// The process-wide proxy state, internally refcounted and inexpensive to
/// clone.
#[derive(Clone)]
pub struct SharedProxy(Arc<ProxyInner>);

struct ProxyInner {
    config_path: PathBuf,
    config: RwLock<Arc<ProxyConfig>>,
    messages: RwLock<Arc<Messages>>,
    favicon: RwLock<Option<String>>,
    registry: Arc<PacketRegistry>,
    players: PlayerRegistry,
    servers: ServerMap,
    commands: CommandManager,
    callbacks: ErasedCallbacks,
    limiter: LoginRateLimiter,
    /// Limits simultaneous connections; closed on shutdown.
    connection_sema: Arc<Semaphore>,
    active: Arc<ActiveSessions>,
    /// The RSA keypair used for encryption with clients.
    rsa_key: RsaPrivateKey,
    /// The public part of `rsa_key` encoded in DER, sent to clients during
    /// the authentication process.
    public_key_der: Box<[u8]>,
    /// For session server requests.
    http_client: reqwest::Client,
}

impl SharedProxy {
    pub fn config(&self) -> Arc<ProxyConfig> {
        self.0.config.read().clone()
    }

    pub fn messages(&self) -> Arc<Messages> {
        self.0.messages.read().clone()
    }

    pub(crate) fn favicon(&self) -> Option<String> {
        self.0.favicon.read().clone()
    }

    pub(crate) fn registry(&self) -> Arc<PacketRegistry> {
        self.0.registry.clone()
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.0.players
    }

    pub fn servers(&self) -> &ServerMap {
        &self.0.servers
    }

    pub fn commands(&self) -> &CommandManager {
        &self.0.commands
    }

    pub(crate) fn callbacks(&self) -> &ErasedCallbacks {
        &self.0.callbacks
    }

    pub(crate) fn limiter(&self) -> &LoginRateLimiter {
        &self.0.limiter
    }

    pub(crate) fn rsa_key(&self) -> &RsaPrivateKey {
        &self.0.rsa_key
    }

    pub(crate) fn public_key_der(&self) -> &[u8] {
        &self.0.public_key_der
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.0.http_client
    }

    /// Re-reads the configuration file and publishes fresh snapshots of
    /// everything hot-reloadable: the server table (evacuating players on
    /// removed backends), messages, forwarding, minimum version, and the
    /// rate limit. A changed bind address is rejected with a warning.
    pub fn reload(&self) -> anyhow::Result<()> {
        let new = ProxyConfig::load(&self.0.config_path)?;
        let old = self.config();

        if new.bind != old.bind {
            warn!(
                "bind address changed from {} to {}; this requires a restart and was ignored",
                old.bind, new.bind
            );
        }

        let removed = self
            .0
            .servers
            .replace(new.backends(), new.servers.try_order.clone());

        self.0.limiter.set_min_gap(new.login_ratelimit_gap());
        *self.0.messages.write() = Arc::new(Messages::load(&new.lang_dir));
        *self.0.favicon.write() = new.load_favicon();
        *self.0.config.write() = Arc::new(new);

        command::register_builtins(self);

        self.evacuate(&removed);

        info!("configuration reloaded");
        Ok(())
    }

    /// Moves every player on a removed backend to a fallback, or kicks
    /// them if none is configured.
    fn evacuate(&self, removed: &[String]) {
        if removed.is_empty() {
            return;
        }

        for handle in self.players().all() {
            let Some(current) = handle.current_server() else {
                continue;
            };
            if !removed.contains(&current) {
                continue;
            }

            let fallback = self
                .servers()
                .fallback_candidates(Some(&current), self.config().enable_dynamic_fallbacks, |n| {
                    self.players().count_on(n)
                })
                .into_iter()
                .next();

            match fallback {
                Some(target) => {
                    if let Err(e) = handle.request_switch(target.name.clone(), true) {
                        warn!(
                            username = %handle.profile.username,
                            "could not evacuate from removed server: {e}"
                        );
                    }
                }
                None => handle.kick(self.messages().format("disconnect.no-fallback", &[])),
            }
        }
    }

    /// Stops accepting connections, kicks every session, and waits up to
    /// the grace period for teardown. Returns the number of sessions that
    /// were still alive when the wait expired.
    pub async fn shutdown(&self) -> usize {
        self.0.connection_sema.close();

        self.0
            .players
            .kick_all(&self.messages().format("disconnect.proxy-shutdown", &[]));

        if tokio::time::timeout(SHUTDOWN_GRACE, self.0.active.wait_idle())
            .await
            .is_err()
        {
            let stragglers = self.0.active.count.load(Ordering::Acquire);
            warn!("{stragglers} session(s) did not tear down within the grace period");
            stragglers
        } else {
            0
        }
    }
}

/// A bound, not-yet-running proxy.
pub struct Proxy {
    shared: SharedProxy,
    listener: TcpListener,
    query_task: Option<tokio::task::JoinHandle<()>>,
}

impl Proxy {
    /// Builds the shared state and binds the listener (and the query
    /// endpoint, when enabled).
    pub async fn bind(
        config_path: impl Into<PathBuf>,
        config: ProxyConfig,
        callbacks: impl Into<ErasedCallbacks>,
    ) -> anyhow::Result<Self> {
        let bind_addr = config.bind_addr()?;

        let rsa_key = RsaPrivateKey::new(&mut OsRng, 1024).context("generating RSA keypair")?;
        let public_key_der =
            rsa_der::public_key_to_der(&rsa_key.n().to_bytes_be(), &rsa_key.e().to_bytes_be())
                .into_boxed_slice();

        let http_client = reqwest::Client::builder()
            .timeout(SESSION_SERVICE_TIMEOUT)
            .build()
            .context("building HTTP client")?;

        let servers = ServerMap::new(config.backends(), config.servers.try_order.clone());
        let messages = Messages::load(&config.lang_dir);
        let favicon = config.load_favicon();
        let limiter = LoginRateLimiter::new(config.login_ratelimit_gap());

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("binding {bind_addr}"))?;

        let query_task = config
            .query_enabled
            .then(|| query::spawn(bind_addr.ip(), config.query_port));

        let shared = SharedProxy(Arc::new(ProxyInner {
            config_path: config_path.into(),
            config: RwLock::new(Arc::new(config)),
            messages: RwLock::new(Arc::new(messages)),
            favicon: RwLock::new(favicon),
            registry: Arc::new(PacketRegistry::new()),
            players: PlayerRegistry::new(),
            servers,
            commands: CommandManager::new(),
            callbacks: callbacks.into(),
            limiter,
            connection_sema: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            active: Arc::new(ActiveSessions::default()),
            rsa_key,
            public_key_der,
            http_client,
        }));

        command::register_builtins(&shared);

        Ok(Self {
            shared,
            listener,
            query_task,
        })
    }

    pub fn shared(&self) -> SharedProxy {
        self.shared.clone()
    }

    /// The address the listener actually bound, useful with a `:0` bind.
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until [`SharedProxy::shutdown`] closes the
    /// semaphore.
    pub async fn run(self) -> anyhow::Result<()> {
        let shared = self.shared;

        info!(
            "listening on {}",
            self.listener.local_addr().map_or_else(
                |_| "<unknown>".to_owned(),
                |addr| addr.to_string()
            )
        );

        loop {
            // Closed semaphore indicates proxy shutdown.
            let Ok(permit) = shared.0.connection_sema.clone().acquire_owned().await else {
                break;
            };

            match self.listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let shared = shared.clone();
                    let tracker = shared.0.active.track();

                    tokio::spawn(async move {
                        // A panicking session is an internal fault: log
                        // it, release the connection slot, keep serving.
                        let task = tokio::spawn(session::handle_connection(
                            shared,
                            stream,
                            remote_addr,
                        ));
                        if let Err(e) = task.await {
                            error!("connection task failed: {e}");
                        }
                        drop(tracker);
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("failed to accept incoming connection: {e}");
                }
            }
        }

        if let Some(task) = self.query_task {
            task.abort();
        }

        Ok(())
    }
}
