//! Outbound connections to backends on behalf of one session.

use std::net::SocketAddr;

use anyhow::anyhow;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace};
use wharf_protocol::packets::login::PlayerKey;
use wharf_protocol::packets::{
    HandshakeC2s, HandshakeNextState, LoginAcknowledgedC2s, LoginCompressionS2c,
    LoginDisconnectS2c, LoginHelloC2s, LoginQueryRequestS2c, LoginQueryResponseC2s,
    LoginSuccessS2c,
};
use wharf_protocol::{
    CompressionThreshold, GameProfile, PacketKind, PacketSide, PacketState, ProtocolVersion,
};

use crate::forward::{self, ForwardingMode};
use crate::packet_io::Conn;
use crate::servers::RegisteredBackend;
use crate::SharedProxy;

/// Why a backend could not be joined. `Unreachable` routes to fallbacks;
/// the other variants surface to the caller.
#[derive(Debug, Error)]
pub(crate) enum ConnectError {
    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dial to {address} timed out")]
    DialTimeout { address: String },
    #[error("backend kicked during login: {reason}")]
    Kicked { reason: String },
    #[error("backend is in online mode; put it behind the proxy in offline mode")]
    OnlineMode,
    #[error("modern forwarding requires a 1.13+ client")]
    ForwardingUnsupported,
    #[error(transparent)]
    Protocol(#[from] anyhow::Error),
}

/// An established link to one backend, in the configuration state (modern
/// protocols) or play state (older), ready for the relay.
pub(crate) struct BackendLink {
    pub backend: RegisteredBackend,
    pub conn: Conn,
}

/// What the backend handshake needs to know about the client connection.
pub(crate) struct ClientInfo<'a> {
    pub profile: &'a GameProfile,
    pub remote: SocketAddr,
    pub version: ProtocolVersion,
    /// The virtual host the client asked for, forge markers stripped.
    pub handshake_host: &'a str,
    pub handshake_port: u16,
    pub key: Option<&'a PlayerKey>,
}

/// Dials `backend`, performs the handshake and login with the configured
/// forwarding strategy, and leaves the link ready for relaying.
pub(crate) async fn connect(
    shared: &SharedProxy,
    backend: &RegisteredBackend,
    client: &ClientInfo<'_>,
) -> Result<BackendLink, ConnectError> {
    let config = shared.config();
    let mode = backend
        .forwarding
        .unwrap_or(config.player_info_forwarding_mode);

    if !mode.supports(client.version) {
        return Err(ConnectError::ForwardingUnsupported);
    }

    let stream = match tokio::time::timeout(
        config.connect_timeout(),
        TcpStream::connect(&backend.address),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ConnectError::Dial {
                address: backend.address.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(ConnectError::DialTimeout {
                address: backend.address.clone(),
            })
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY on backend link: {e}");
    }

    let mut conn = Conn::new(
        stream,
        shared.registry(),
        PacketSide::Serverbound,
        config.read_timeout(),
        config.compression_level,
    );
    conn.set_version(client.version);

    let address = match mode {
        ForwardingMode::Legacy => forward::legacy_handshake_address(
            client.handshake_host,
            client.remote.ip(),
            client.profile,
            None,
        )?,
        ForwardingMode::BungeeGuard => forward::legacy_handshake_address(
            client.handshake_host,
            client.remote.ip(),
            client.profile,
            Some(&config.forwarding_secret),
        )?,
        ForwardingMode::None | ForwardingMode::Modern => client.handshake_host.to_owned(),
    };

    conn.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: client.version.number(),
            server_address: address,
            server_port: client.handshake_port,
            next_state: HandshakeNextState::Login,
        },
    )
    .await?;
    conn.set_state(PacketState::Login);

    conn.send(
        PacketKind::LoginHelloC2s,
        &LoginHelloC2s {
            username: client.profile.username.clone(),
            key: client.key.cloned(),
            profile_id: Some(client.profile.uuid),
        },
    )
    .await?;

    drive_login(&mut conn, shared, mode, client).await?;

    if client.version.has_config_state() {
        conn.send(PacketKind::LoginAcknowledgedC2s, &LoginAcknowledgedC2s)
            .await?;
        conn.set_state(PacketState::Configuration);
    } else {
        conn.set_state(PacketState::Play);
    }

    Ok(BackendLink {
        backend: backend.clone(),
        conn,
    })
}

/// Runs the backend's login state until success, absorbing SetCompression
/// and answering forwarding queries along the way.
async fn drive_login(
    conn: &mut Conn,
    shared: &SharedProxy,
    mode: ForwardingMode,
    client: &ClientInfo<'_>,
) -> Result<(), ConnectError> {
    loop {
        let frame = conn.recv_frame().await?;
        let version = conn.meta.version;

        match conn.meta.kind_of(&frame) {
            Some(PacketKind::LoginDisconnectS2c) => {
                let pkt: LoginDisconnectS2c = frame.decode_as(version)?;
                return Err(ConnectError::Kicked {
                    reason: pkt.reason.flatten(),
                });
            }
            Some(PacketKind::LoginHelloS2c) => {
                // An encryption request means the backend wants to
                // authenticate the player itself, which a proxied setup
                // cannot satisfy.
                return Err(ConnectError::OnlineMode);
            }
            Some(PacketKind::LoginCompressionS2c) => {
                let pkt: LoginCompressionS2c = frame.decode_as(version)?;
                if pkt.threshold.0 < -1 {
                    return Err(anyhow!("negative compression threshold").into());
                }
                conn.set_compression(CompressionThreshold(pkt.threshold.0));
            }
            Some(PacketKind::LoginQueryRequestS2c) => {
                let query: LoginQueryRequestS2c = frame.decode_as(version)?;
                answer_query(conn, shared, mode, client, query).await?;
            }
            Some(PacketKind::LoginSuccessS2c) => {
                let success: LoginSuccessS2c = frame.decode_as(version)?;
                trace!(username = %success.username, "backend login succeeded");
                return Ok(());
            }
            other => {
                return Err(anyhow!(
                    "unexpected packet {other:?} (ID {:#04x}) during backend login",
                    frame.id
                )
                .into());
            }
        }
    }
}

async fn answer_query(
    conn: &mut Conn,
    shared: &SharedProxy,
    mode: ForwardingMode,
    client: &ClientInfo<'_>,
    query: LoginQueryRequestS2c,
) -> Result<(), ConnectError> {
    let understood = mode == ForwardingMode::Modern
        && query.channel == forward::MODERN_FORWARDING_CHANNEL;

    let data = if understood {
        forward::check_modern_forwarding_request(&query.data)?;
        Some(forward::modern_forwarding_payload(
            &shared.config().forwarding_secret,
            client.remote.ip(),
            client.profile,
        )?)
    } else {
        // Unknown queries get an explicit "not understood" so the backend
        // can proceed (or kick) rather than time out.
        None
    };

    conn.send(
        PacketKind::LoginQueryResponseC2s,
        &LoginQueryResponseC2s {
            message_id: query.message_id,
            data,
        },
    )
    .await?;

    Ok(())
}

/// Picks the first reachable backend for an initial join: the configured
/// fallback list in order (or rotated/dynamic per config), starting with
/// an explicit target when one is given.
pub(crate) fn candidate_backends(
    shared: &SharedProxy,
    target: Option<&RegisteredBackend>,
    exclude: Option<&str>,
) -> Vec<RegisteredBackend> {
    let config = shared.config();
    let mut out: Vec<RegisteredBackend> = target.into_iter().cloned().collect();

    for candidate in shared.servers().fallback_candidates(
        exclude,
        config.enable_dynamic_fallbacks,
        |name| shared.players().count_on(name),
    ) {
        if out.iter().all(|b| b.name != candidate.name) {
            out.push(candidate);
        }
    }

    out
}
