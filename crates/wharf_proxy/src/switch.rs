//! The transparent server switch.
//!
//! Moving a live player means dialing the new backend while the old link
//! stays authoritative, resetting the client's world state (a JoinGame
//! plus Respawn pair on legacy protocols, a configuration-phase re-sync on
//! 1.20.2+), and only then releasing the old link. A dial or handshake
//! failure leaves the original link untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use tracing::{debug, info};
use wharf_protocol::packets::login::PlayerKey;
use wharf_protocol::packets::{
    AcknowledgeConfigurationC2s, CustomPayloadC2s, Dimension, DisconnectS2c,
    FinishConfigurationC2s, FinishConfigurationS2c, GameJoinS2c, RespawnS2c,
    StartConfigurationS2c,
};
use wharf_protocol::{GameProfile, PacketFrame, PacketKind, PacketState, ProtocolVersion, Text};

use crate::backend::{self, BackendLink, ClientInfo, ConnectError};
use crate::packet_io::{Conn, ConnReader, ConnWriter};
use crate::players::SessionHandle;
use crate::relay::{register_channel, ChannelSet, OldLink};
use crate::servers::RegisteredBackend;
use crate::SharedProxy;

/// Frames a backend may emit before its JoinGame; anything beyond this is
/// treated as a misbehaving backend.
const PRE_JOIN_BUFFER_LIMIT: usize = 128;

/// Everything a switch needs to know about the session it is moving.
pub(crate) struct SwitchCtx<'a> {
    pub shared: &'a SharedProxy,
    pub profile: &'a GameProfile,
    pub key: Option<&'a PlayerKey>,
    pub handle: &'a Arc<SessionHandle>,
    pub remote: SocketAddr,
    pub handshake_host: &'a str,
    pub handshake_port: u16,
    pub channels: &'a ChannelSet,
}

impl SwitchCtx<'_> {
    pub fn client_info(&self) -> ClientInfo<'_> {
        ClientInfo {
            profile: self.profile,
            remote: self.remote,
            version: self.handle.version,
            handshake_host: self.handshake_host,
            handshake_port: self.handshake_port,
            key: self.key,
        }
    }
}

/// The client-socket halves a switch operates on.
pub(crate) struct ClientIo {
    pub r: ConnReader,
    pub w: ConnWriter,
}

pub(crate) enum SwitchResult {
    /// The session now talks to `backend`; `old` is released by the relay
    /// once the new link produces its first play frame.
    Switched {
        client: ClientIo,
        backend: (ConnReader, ConnWriter),
        old: Option<OldLink>,
    },
    /// Target is the current backend and force was not set.
    NoOp {
        client: ClientIo,
        old: Option<OldLink>,
    },
    /// The target could not be reached or refused the handshake; the
    /// caller decides between resuming the old link and fallbacks.
    TargetFailed {
        client: ClientIo,
        old: Option<OldLink>,
        error: ConnectError,
    },
    /// The client itself failed mid-switch; only teardown remains.
    ClientLost(anyhow::Error),
}

/// Executes a switch to `target`.
pub(crate) async fn execute(
    ctx: &SwitchCtx<'_>,
    client: ClientIo,
    old: Option<OldLink>,
    target: &RegisteredBackend,
    force: bool,
) -> SwitchResult {
    if !force && ctx.handle.current_server().as_deref() == Some(target.name.as_str()) {
        return SwitchResult::NoOp { client, old };
    }

    let new_link = match backend::connect(ctx.shared, target, &ctx.client_info()).await {
        Ok(link) => link,
        Err(error) => {
            return SwitchResult::TargetFailed { client, old, error };
        }
    };

    info!(
        player = %ctx.profile.username,
        server = %target.name,
        "switching backend"
    );

    let result = if ctx.handle.version.has_config_state() {
        modern_switch(ctx, client, new_link).await
    } else {
        legacy_switch(ctx, client, new_link).await
    };

    match result {
        Ok((client, backend_conn)) => {
            ctx.handle.set_current_server(Some(target.name.clone()));
            ctx.shared
                .callbacks()
                .inner
                .on_server_connected(ctx.profile, &target.name)
                .await;

            let (backend_r, backend_w) = backend_conn.into_split();
            SwitchResult::Switched {
                client,
                backend: (backend_r, backend_w),
                old,
            }
        }
        Err(e) => SwitchResult::ClientLost(e),
    }
}

/// Legacy path: the client stays in the play state. The new backend's
/// JoinGame is captured and forwarded, then a Respawn pair forces the
/// client to rebuild its world state.
async fn legacy_switch(
    ctx: &SwitchCtx<'_>,
    mut client: ClientIo,
    mut link: BackendLink,
) -> anyhow::Result<(ClientIo, Conn)> {
    let version = ctx.handle.version;

    let mut buffered: Vec<PacketFrame> = Vec::new();
    let join = loop {
        let frame = link.conn.recv_frame().await?;

        match link.conn.meta.kind_of(&frame) {
            Some(PacketKind::GameJoinS2c) => {
                let join: GameJoinS2c = frame.decode_as(version)?;
                client.w.send_frame(&frame).await?;
                break join;
            }
            Some(PacketKind::DisconnectS2c) => {
                let pkt: DisconnectS2c = frame.decode_as(version)?;
                bail!("backend kicked before join: {}", pkt.reason.flatten());
            }
            _ => {
                buffered.push(frame);
                if buffered.len() > PRE_JOIN_BUFFER_LIMIT {
                    bail!("backend sent {PRE_JOIN_BUFFER_LIMIT}+ frames before JoinGame");
                }
            }
        }
    };

    // Pre-1.16 clients only rebuild the world on a dimension *change*, so
    // bounce through a different dimension first. 1.16+ fully resets on
    // the JoinGame itself; a single respawn into the target dimension is
    // enough to clear leftovers.
    let respawn = RespawnS2c::from_game_join(&join);

    if version < ProtocolVersion::V1_16 {
        let mut detour = respawn.clone();
        detour.dimension = match respawn.dimension {
            Dimension::Id(0) => Dimension::Id(-1),
            Dimension::Id(_) => Dimension::Id(0),
            ref other => bail!("pre-1.16 join carried non-numeric dimension {other:?}"),
        };

        client.w.send(PacketKind::RespawnS2c, &detour).await?;
    }

    client.w.send(PacketKind::RespawnS2c, &respawn).await?;

    for frame in &buffered {
        client.w.send_frame(frame).await?;
    }

    replay_registrations(ctx, &mut link.conn).await?;

    Ok((client, link.conn))
}

/// Sends StartConfiguration and waits for the client's acknowledgement,
/// leaving the client halves in the configuration state.
///
/// Play packets already in flight from the client are discarded until the
/// acknowledgement arrives; they were addressed to a world that no longer
/// exists.
async fn enter_client_config(client: &mut ClientIo) -> anyhow::Result<()> {
    client
        .w
        .send(PacketKind::StartConfigurationS2c, &StartConfigurationS2c)
        .await?;

    loop {
        let frame = client.r.recv_frame().await?;
        match client.r.meta.kind_of(&frame) {
            Some(PacketKind::AcknowledgeConfigurationC2s) => {
                let _: AcknowledgeConfigurationC2s = frame.decode_as(client.r.meta.version)?;
                break;
            }
            _ => debug!("discarding play frame {:#04x} during switch", frame.id),
        }
    }

    client.r.meta.state = PacketState::Configuration;
    client.w.meta.state = PacketState::Configuration;
    Ok(())
}

/// Modern path: the client is steered back into the configuration state
/// and re-synchronized from the new backend.
async fn modern_switch(
    ctx: &SwitchCtx<'_>,
    mut client: ClientIo,
    mut link: BackendLink,
) -> anyhow::Result<(ClientIo, Conn)> {
    enter_client_config(&mut client).await?;
    run_config_phase(ctx, &mut client, &mut link.conn, true).await?;
    Ok((client, link.conn))
}

/// Mirrors a backend-initiated configuration re-entry (its
/// StartConfiguration was absorbed by the relay) onto the client, then
/// relays the phase to completion with the same backend.
pub(crate) async fn resync_existing(
    ctx: &SwitchCtx<'_>,
    mut client: ClientIo,
    mut backend: Conn,
) -> anyhow::Result<(ClientIo, Conn)> {
    enter_client_config(&mut client).await?;
    backend.set_state(PacketState::Configuration);
    run_config_phase(ctx, &mut client, &mut backend, false).await?;
    Ok((client, backend))
}

/// Relays the configuration phase between a client and a freshly attached
/// backend until the FinishConfiguration exchange completes, leaving both
/// sides in the play state.
///
/// Registry data, tags, and other configuration traffic pass through
/// opaquely; the disciplined-state unknown-ID rule applies to the phases
/// the proxy terminates itself, not to an attached backend's stream.
pub(crate) async fn run_config_phase(
    ctx: &SwitchCtx<'_>,
    client: &mut ClientIo,
    backend: &mut Conn,
    replay_channels: bool,
) -> anyhow::Result<()> {
    if replay_channels {
        replay_registrations(ctx, backend).await?;
    }

    let mut finish_sent = false;

    loop {
        tokio::select! {
            frame = backend.recv_frame() => {
                let frame = frame?;
                match backend.meta.kind_of(&frame) {
                    Some(PacketKind::DisconnectS2c) => {
                        let pkt: DisconnectS2c = frame.decode_as(backend.meta.version)?;
                        bail!("backend kicked during configuration: {}", pkt.reason.flatten());
                    }
                    Some(PacketKind::FinishConfigurationS2c) => {
                        let _: FinishConfigurationS2c = frame.decode_as(backend.meta.version)?;
                        client.w.send_frame(&frame).await?;
                        finish_sent = true;
                    }
                    _ => client.w.send_frame(&frame).await?,
                }
            }

            frame = client.r.recv_frame() => {
                let frame = frame?;
                match client.r.meta.kind_of(&frame) {
                    Some(PacketKind::FinishConfigurationC2s) if finish_sent => {
                        let _: FinishConfigurationC2s = frame.decode_as(client.r.meta.version)?;
                        backend.send_frame(&frame).await?;

                        client.r.meta.state = PacketState::Play;
                        client.w.meta.state = PacketState::Play;
                        backend.set_state(PacketState::Play);
                        return Ok(());
                    }
                    Some(PacketKind::CustomPayloadC2s) => {
                        if let Ok(msg) =
                            frame.decode_as::<CustomPayloadC2s>(client.r.meta.version)
                        {
                            crate::relay::track_channels(ctx.channels, &msg.channel, &msg.data);
                        }
                        backend.send_frame(&frame).await?;
                    }
                    _ => backend.send_frame(&frame).await?,
                }
            }
        }
    }
}

/// Replays the client's plugin-channel registrations to a new backend so
/// mod traffic keeps flowing after a switch.
async fn replay_registrations(ctx: &SwitchCtx<'_>, backend: &mut Conn) -> anyhow::Result<()> {
    let channels: Vec<String> = ctx.channels.lock().iter().cloned().collect();
    if channels.is_empty() {
        return Ok(());
    }

    backend
        .send(
            PacketKind::CustomPayloadC2s,
            &CustomPayloadC2s {
                channel: register_channel(ctx.handle.version).to_owned(),
                data: channels.join("\0").into_bytes(),
            },
        )
        .await
}

/// Walks the fallback candidates for a session whose backend went away.
/// Returns the first successful switch, or the client halves if none
/// succeeded.
pub(crate) async fn fallback(
    ctx: &SwitchCtx<'_>,
    mut client: ClientIo,
    exclude: Option<&str>,
) -> Result<SwitchResult, (ClientIo, Option<Text>)> {
    let candidates = backend::candidate_backends(ctx.shared, None, exclude);

    for candidate in &candidates {
        match execute(ctx, client, None, candidate, true).await {
            SwitchResult::TargetFailed {
                client: c, error, ..
            } => {
                debug!(server = %candidate.name, "fallback failed: {error}");
                client = c;
            }
            other => return Ok(other),
        }
    }

    Err((client, None))
}

/// Errors a caller of the switch API can observe.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("unknown server {0:?}")]
    UnknownServer(String),
    #[error(transparent)]
    Request(#[from] crate::players::SwitchRequestError),
}

/// Public entry point used by commands and admin surfaces: validates the
/// target and queues the switch on the session's control channel.
pub fn request_switch(
    shared: &SharedProxy,
    handle: &SessionHandle,
    target: &str,
    force: bool,
) -> Result<(), SwitchError> {
    if shared.servers().get(target).is_none() {
        return Err(SwitchError::UnknownServer(target.to_owned()));
    }

    handle.request_switch(target.to_owned(), force)?;
    Ok(())
}
