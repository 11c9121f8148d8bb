//! Per-connection session handling: the staged automaton from TCP accept
//! through handshake, status or login, the configuration phase, the play
//! relay, switches, and teardown.

use std::io::ErrorKind;
use std::net::SocketAddr;

use anyhow::{ensure, Context};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};
use wharf_protocol::packets::{
    DisconnectS2c, HandshakeC2s, HandshakeNextState, QueryPingC2s, QueryPongS2c, QueryRequestC2s,
    QueryResponseS2c,
};
use wharf_protocol::{PacketKind, PacketSide, PacketState, ProtocolVersion, Text};

use crate::backend;
use crate::haproxy;
use crate::login::{self, LoginOutcome};
use crate::packet_io::Conn;
use crate::ping::{PlayerSampleEntry, StatusResponse};
use crate::players::ControlMessage;
use crate::relay::{self, ChannelSet, OldLink, RelayExit, RelayIo};
use crate::switch::{self, ClientIo, SwitchCtx, SwitchResult};
use crate::SharedProxy;

/// How many entries the status player sample shows.
const SAMPLE_SIZE: usize = 12;

pub(crate) async fn handle_connection(
    shared: SharedProxy,
    mut stream: TcpStream,
    mut remote: SocketAddr,
) {
    trace!("handling connection");

    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {e}");
    }

    let config = shared.config();

    if config.haproxy {
        match haproxy::read_header(&mut stream).await {
            Ok(real_remote) => remote = real_remote,
            Err(e) => {
                debug!("rejecting connection without valid PROXY header: {e:#}");
                return;
            }
        }
    }

    let conn = Conn::new(
        stream,
        shared.registry(),
        PacketSide::Clientbound,
        config.read_timeout(),
        config.compression_level,
    );

    if let Err(e) = handle_handshake(&shared, conn, remote).await {
        // EOF can happen if the client disconnects while joining, which
        // isn't very erroneous.
        if let Some(e) = e.downcast_ref::<std::io::Error>() {
            if e.kind() == ErrorKind::UnexpectedEof {
                return;
            }
        }
        warn!(%remote, "connection ended with error: {e:#}");
    }
}

/// The handshake fields carried through the session.
pub(crate) struct HandshakeData {
    pub protocol_number: i32,
    /// Virtual host with forge markers stripped.
    pub host: String,
    pub port: u16,
    pub is_forge: bool,
}

/// Separates the hostname from forge's `\0`-delimited marker suffix.
fn clean_host(raw: &str) -> (&str, bool) {
    match raw.split_once('\0') {
        Some((host, rest)) => (host, rest.contains("FML")),
        None => (raw, false),
    }
}

async fn handle_handshake(
    shared: &SharedProxy,
    mut conn: Conn,
    remote: SocketAddr,
) -> anyhow::Result<()> {
    let handshake: HandshakeC2s = conn.recv_expect(PacketKind::HandshakeC2s).await?;

    if !shared
        .callbacks()
        .inner
        .on_handshake(remote, &handshake)
        .await
    {
        return Ok(());
    }

    let (host, is_forge) = clean_host(&handshake.server_address);
    ensure!(
        host.chars().count() <= 255,
        "handshake server address is too long"
    );

    let data = HandshakeData {
        protocol_number: handshake.protocol_version,
        host: host.to_owned(),
        port: handshake.server_port,
        is_forge,
    };

    match handshake.next_state {
        HandshakeNextState::Status => handle_status(shared, &mut conn, remote, &data)
            .await
            .context("error handling status"),
        HandshakeNextState::Login | HandshakeNextState::Transfer => {
            handle_login_path(shared, conn, remote, data)
                .await
                .context("error handling login")
        }
    }
}

async fn handle_status(
    shared: &SharedProxy,
    conn: &mut Conn,
    remote: SocketAddr,
    data: &HandshakeData,
) -> anyhow::Result<()> {
    conn.set_state(PacketState::Status);

    let _: QueryRequestC2s = conn.recv_expect(PacketKind::QueryRequestC2s).await?;

    let sample = shared
        .players()
        .all()
        .into_iter()
        .take(SAMPLE_SIZE)
        .map(|handle| PlayerSampleEntry {
            name: handle.profile.username.clone(),
            id: handle.profile.uuid,
        })
        .collect();

    let mut response = StatusResponse::build(
        &shared.config(),
        data.protocol_number,
        shared.players().len() as i32,
        sample,
        shared.favicon(),
    );

    shared.callbacks().inner.on_ping(remote, &mut response).await;

    conn.send(
        PacketKind::QueryResponseS2c,
        &QueryResponseS2c {
            json: response.to_json(data.protocol_number),
        },
    )
    .await?;

    // Clients may close after the response without pinging; the EOF is
    // downgraded by the caller.
    let ping: QueryPingC2s = conn.recv_expect(PacketKind::QueryPingC2s).await?;
    conn.send(PacketKind::QueryPongS2c, &QueryPongS2c { payload: ping.payload })
        .await?;

    Ok(())
}

async fn handle_login_path(
    shared: &SharedProxy,
    mut conn: Conn,
    remote: SocketAddr,
    data: HandshakeData,
) -> anyhow::Result<()> {
    let config = shared.config();
    let messages = shared.messages();

    conn.set_state(PacketState::Login);

    let known = ProtocolVersion::from_number(data.protocol_number);
    let version = known.filter(|v| *v >= config.minimum_version);

    let Some(version) = version else {
        // Known-but-too-old versions get the kick encoded their own way;
        // unknown numbers are clamped to whichever end of the supported
        // range they fell off.
        conn.set_version(known.unwrap_or(
            if data.protocol_number > ProtocolVersion::MAXIMUM.number() {
                ProtocolVersion::MAXIMUM
            } else {
                ProtocolVersion::MINIMUM
            },
        ));

        debug!(
            protocol = data.protocol_number,
            %remote,
            "refusing login below minimum version"
        );
        login::kick(
            &mut conn,
            messages.format(
                "disconnect.unsupported-version",
                &[("minimum", config.minimum_version.name())],
            ),
        )
        .await?;
        return Ok(());
    };

    conn.set_version(version);

    if data.is_forge && config.disable_forge {
        login::kick(&mut conn, messages.format("disconnect.forge-disabled", &[])).await?;
        return Ok(());
    }

    let Some(outcome) = login::handle_login(shared, &mut conn, remote).await? else {
        return Ok(());
    };

    info!(
        username = %outcome.profile.username,
        uuid = %outcome.profile.uuid,
        %remote,
        version = %version,
        "player logged in"
    );

    run_session(shared, conn, remote, data, outcome).await
}

async fn kick_client(client: &mut ClientIo, reason: Text) -> anyhow::Result<()> {
    client
        .w
        .send(PacketKind::DisconnectS2c, &DisconnectS2c { reason })
        .await
}

/// Owns the session from successful login to teardown: initial join,
/// relay, switches, fallbacks.
async fn run_session(
    shared: &SharedProxy,
    conn: Conn,
    remote: SocketAddr,
    data: HandshakeData,
    outcome: LoginOutcome,
) -> anyhow::Result<()> {
    let LoginOutcome {
        profile,
        key,
        handle,
        guard,
        mut control_rx,
    } = outcome;

    let channels: ChannelSet = ChannelSet::default();

    let ctx = SwitchCtx {
        shared,
        profile: &profile,
        key: key.as_ref(),
        handle: &handle,
        remote,
        handshake_host: &data.host,
        handshake_port: data.port,
        channels: &channels,
    };

    let (client_r, client_w) = conn.into_split();
    let mut client = ClientIo {
        r: client_r,
        w: client_w,
    };

    // Initial join: walk the configured fallback list.
    let mut backend_io = None;
    for candidate in backend::candidate_backends(shared, None, None) {
        let candidate = match shared
            .callbacks()
            .inner
            .on_server_pre_connect(&profile, &candidate.name)
            .await
        {
            crate::event::PreConnectResult::Allow => candidate,
            crate::event::PreConnectResult::Redirect(name) => {
                match shared.servers().get(&name) {
                    Some(redirected) => redirected,
                    None => {
                        warn!("pre-connect redirect to unknown server {name:?}");
                        continue;
                    }
                }
            }
            crate::event::PreConnectResult::Deny => continue,
        };

        match backend::connect(shared, &candidate, &ctx.client_info()).await {
            Ok(mut link) => {
                if handle.version.has_config_state() {
                    if let Err(e) =
                        switch::run_config_phase(&ctx, &mut client, &mut link.conn, false).await
                    {
                        warn!(server = %candidate.name, "configuration phase failed: {e:#}");
                        continue;
                    }
                }

                handle.set_current_server(Some(link.backend.name.clone()));
                shared
                    .callbacks()
                    .inner
                    .on_server_connected(&profile, &link.backend.name)
                    .await;
                info!(
                    username = %profile.username,
                    server = %link.backend.name,
                    "connected to initial server"
                );

                backend_io = Some(link.conn.into_split());
                break;
            }
            Err(e) => {
                warn!(server = %candidate.name, "initial join failed: {e}");
            }
        }
    }

    let Some(mut backend_io) = backend_io else {
        let _ = kick_client(
            &mut client,
            shared.messages().format("disconnect.no-fallback", &[]),
        )
        .await;
        teardown(shared, &profile, guard).await;
        return Ok(());
    };

    let mut old_link: Option<OldLink> = None;

    loop {
        let (backend_r, backend_w) = backend_io;
        let io = RelayIo {
            client_r: client.r,
            client_w: client.w,
            backend_r,
            backend_w,
        };

        match relay::run(io, &mut control_rx, shared, &profile, &channels, old_link.take()).await {
            RelayExit::ClientGone(e) => {
                debug!(username = %profile.username, "client connection ended: {e:#}");
                break;
            }

            RelayExit::Control(msg, io) => {
                client = ClientIo {
                    r: io.client_r,
                    w: io.client_w,
                };
                let old = Some(OldLink {
                    reader: io.backend_r,
                    writer: io.backend_w,
                });

                match msg {
                    ControlMessage::Kick(reason) => {
                        let _ = kick_client(&mut client, reason).await;
                        break;
                    }
                    ControlMessage::Switch { target, force } => {
                        let result = match shared.servers().get(&target) {
                            Some(target) => {
                                switch::execute(&ctx, client, old, &target, force).await
                            }
                            None => {
                                // The server table changed since the
                                // request was validated; resume the
                                // current link.
                                warn!("switch target {target:?} disappeared");
                                SwitchResult::NoOp { client, old }
                            }
                        };
                        handle.finish_switch();

                        match result {
                            SwitchResult::Switched {
                                client: c,
                                backend,
                                old,
                            } => {
                                client = c;
                                backend_io = backend;
                                old_link = old;
                            }
                            SwitchResult::NoOp { client: c, old }
                            | SwitchResult::TargetFailed { client: c, old, .. } => {
                                client = c;
                                let old = old.expect("old link present on control path");
                                backend_io = (old.reader, old.writer);
                            }
                            SwitchResult::ClientLost(e) => {
                                debug!("client lost during switch: {e:#}");
                                break;
                            }
                        }
                    }
                }
            }

            RelayExit::BackendGone {
                reason,
                client_r,
                client_w,
            } => {
                client = ClientIo {
                    r: client_r,
                    w: client_w,
                };

                let lost_server = handle.current_server();
                info!(
                    username = %profile.username,
                    server = ?lost_server,
                    "backend connection lost, routing to fallback"
                );

                match switch::fallback(&ctx, client, lost_server.as_deref()).await {
                    Ok(SwitchResult::Switched {
                        client: c,
                        backend,
                        old,
                    }) => {
                        client = c;
                        backend_io = backend;
                        old_link = old;
                    }
                    Ok(SwitchResult::ClientLost(e)) => {
                        debug!("client lost during fallback: {e:#}");
                        break;
                    }
                    Ok(_) => unreachable!("forced fallback cannot no-op"),
                    Err((mut c, _)) => {
                        let reason = reason.unwrap_or_else(|| {
                            shared
                                .messages()
                                .format("disconnect.lost-connection", &[])
                        });
                        let _ = kick_client(&mut c, reason).await;
                        break;
                    }
                }
            }

            RelayExit::BackendConfig(io) => {
                client = ClientIo {
                    r: io.client_r,
                    w: io.client_w,
                };
                let backend_conn = match Conn::reunite(io.backend_r, io.backend_w) {
                    Ok(conn) => conn,
                    Err(e) => {
                        debug!("could not reunite backend halves: {e:#}");
                        break;
                    }
                };

                match switch::resync_existing(&ctx, client, backend_conn).await {
                    Ok((c, backend_conn)) => {
                        client = c;
                        backend_io = backend_conn.into_split();
                    }
                    Err(e) => {
                        debug!("configuration re-sync failed: {e:#}");
                        break;
                    }
                }
            }

            RelayExit::ControlClosed(_) => break,
        }
    }

    teardown(shared, &profile, guard).await;
    Ok(())
}

async fn teardown(
    shared: &SharedProxy,
    profile: &wharf_protocol::GameProfile,
    guard: crate::players::AdmissionGuard,
) {
    shared.callbacks().inner.on_disconnect(profile).await;
    drop(guard);
    info!(username = %profile.username, "player disconnected");
}
