//! The play-state relay.
//!
//! Two pump tasks move frames between client and backend, one per
//! direction, re-framing without re-encoding. Writes are awaited, so a
//! slow receiver pauses reads from the opposite peer symmetrically; the
//! in-flight budget per direction is bounded by the socket buffers plus
//! one frame.
//!
//! Pumps are stopped through a watch signal and hand their I/O halves
//! back, which is how the switch coordinator takes ownership of the
//! client socket mid-session.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use wharf_protocol::packets::{CustomPayloadC2s, DisconnectS2c};
use wharf_protocol::{GameProfile, PacketKind, ProtocolVersion, Text};

use crate::packet_io::{ConnReader, ConnWriter};
use crate::players::ControlMessage;
use crate::SharedProxy;

/// The set of plugin channels the client has registered, carried across
/// switches so they can be replayed to a fresh backend.
pub(crate) type ChannelSet = Arc<Mutex<HashSet<String>>>;

/// The channel pairs used for (un)registration, modern and pre-1.13.
pub(crate) fn register_channel(version: ProtocolVersion) -> &'static str {
    if version >= ProtocolVersion::V1_13 {
        "minecraft:register"
    } else {
        "REGISTER"
    }
}

fn is_register(channel: &str) -> bool {
    channel == "minecraft:register" || channel == "REGISTER"
}

fn is_unregister(channel: &str) -> bool {
    channel == "minecraft:unregister" || channel == "UNREGISTER"
}

/// A superseded backend link held open until the replacement proves
/// itself. Dropping both halves closes the socket.
pub(crate) struct OldLink {
    pub reader: ConnReader,
    pub writer: ConnWriter,
}

/// All four halves of an installed relay.
pub(crate) struct RelayIo {
    pub client_r: ConnReader,
    pub client_w: ConnWriter,
    pub backend_r: ConnReader,
    pub backend_w: ConnWriter,
}

/// Why the relay stopped.
pub(crate) enum RelayExit {
    /// The client vanished or misbehaved; only teardown remains.
    ClientGone(anyhow::Error),
    /// The backend link died. Client halves come back for fallback
    /// routing; `reason` is set when the backend sent a disconnect.
    BackendGone {
        reason: Option<Text>,
        client_r: ConnReader,
        client_w: ConnWriter,
    },
    /// The backend re-entered the configuration phase on its own; the
    /// session must run a config re-sync with the same backend.
    BackendConfig(RelayIo),
    /// A control message arrived; the relay is paused with all halves
    /// returned.
    Control(ControlMessage, RelayIo),
    /// Every control sender dropped, which cannot happen while the session
    /// is registered; treated as teardown.
    ControlClosed(RelayIo),
}

enum PumpEnd {
    Stopped,
    ReadFailed(anyhow::Error),
    WriteFailed(anyhow::Error),
    /// Backend sent a disconnect (absorbed, not forwarded).
    Disconnect(Option<Text>),
    /// Backend sent StartConfiguration (absorbed).
    EnterConfig,
}

struct PumpReturn {
    reader: ConnReader,
    writer: ConnWriter,
    end: PumpEnd,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    ClientToBackend,
    BackendToClient,
}

struct PumpCtx {
    shared: SharedProxy,
    profile: GameProfile,
    channels: ChannelSet,
    /// The superseded backend link, closed by the backend-to-client pump
    /// after it forwards the first play frame from the new backend.
    old_link: Mutex<Option<OldLink>>,
}

/// Runs the relay until something needs the session's attention.
pub(crate) async fn run(
    io: RelayIo,
    control_rx: &mut mpsc::Receiver<ControlMessage>,
    shared: &SharedProxy,
    profile: &GameProfile,
    channels: &ChannelSet,
    old_link: Option<OldLink>,
) -> RelayExit {
    let (stop_tx, stop_rx) = watch::channel(false);

    let ctx = Arc::new(PumpCtx {
        shared: shared.clone(),
        profile: profile.clone(),
        channels: channels.clone(),
        old_link: Mutex::new(old_link),
    });

    let mut task_c2b = tokio::spawn(pump(
        io.client_r,
        io.backend_w,
        stop_rx.clone(),
        Direction::ClientToBackend,
        ctx.clone(),
    ));
    let mut task_b2c = tokio::spawn(pump(
        io.backend_r,
        io.client_w,
        stop_rx,
        Direction::BackendToClient,
        ctx.clone(),
    ));

    let stop = |tx: watch::Sender<bool>| {
        let _ = tx.send(true);
    };

    tokio::select! {
        msg = control_rx.recv() => {
            stop(stop_tx);
            let a = task_c2b.await;
            let b = task_b2c.await;

            match (a, b) {
                (Ok(a), Ok(b)) => {
                    let io = RelayIo {
                        client_r: a.reader,
                        client_w: b.writer,
                        backend_r: b.reader,
                        backend_w: a.writer,
                    };

                    match msg {
                        Some(msg) => RelayExit::Control(msg, io),
                        None => RelayExit::ControlClosed(io),
                    }
                }
                (a, b) => pump_fault(a.err().or(b.err())),
            }
        }

        a = &mut task_c2b => {
            stop(stop_tx);
            let b = task_b2c.await;
            match (a, b) {
                (Ok(a), Ok(b)) => classify(a, b),
                (a, b) => pump_fault(a.err().or(b.err())),
            }
        }

        b = &mut task_b2c => {
            stop(stop_tx);
            let a = task_c2b.await;
            match (a, b) {
                (Ok(a), Ok(b)) => classify(a, b),
                (a, b) => pump_fault(a.err().or(b.err())),
            }
        }
    }
}

/// A panicked pump is an internal fault: its I/O half is gone, so the
/// session closes, but the proxy stays alive.
fn pump_fault(error: Option<tokio::task::JoinError>) -> RelayExit {
    tracing::error!("relay pump failed: {error:?}");
    RelayExit::ClientGone(anyhow::anyhow!("relay pump failed"))
}

/// Decides what the pair of pump endings means for the session.
fn classify(a: PumpReturn, b: PumpReturn) -> RelayExit {
    let io = RelayIo {
        client_r: a.reader,
        client_w: b.writer,
        backend_r: b.reader,
        backend_w: a.writer,
    };

    // Backend-to-client endings carry the richer verdicts.
    match b.end {
        PumpEnd::Disconnect(reason) => {
            return RelayExit::BackendGone {
                reason,
                client_r: io.client_r,
                client_w: io.client_w,
            }
        }
        PumpEnd::EnterConfig => return RelayExit::BackendConfig(io),
        PumpEnd::ReadFailed(e) => {
            debug!("backend read ended: {e:#}");
            return RelayExit::BackendGone {
                reason: None,
                client_r: io.client_r,
                client_w: io.client_w,
            };
        }
        PumpEnd::WriteFailed(e) => return RelayExit::ClientGone(e),
        PumpEnd::Stopped => {}
    }

    match a.end {
        PumpEnd::ReadFailed(e) => RelayExit::ClientGone(e),
        PumpEnd::WriteFailed(e) => {
            debug!("backend write ended: {e:#}");
            RelayExit::BackendGone {
                reason: None,
                client_r: io.client_r,
                client_w: io.client_w,
            }
        }
        _ => RelayExit::ClientGone(anyhow::anyhow!("relay stopped unexpectedly")),
    }
}

async fn pump(
    mut reader: ConnReader,
    mut writer: ConnWriter,
    mut stop: watch::Receiver<bool>,
    direction: Direction,
    ctx: Arc<PumpCtx>,
) -> PumpReturn {
    let done = |reader, writer, end| PumpReturn {
        reader,
        writer,
        end,
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => return done(reader, writer, PumpEnd::Stopped),
            r = reader.recv_frame() => match r {
                Ok(frame) => frame,
                Err(e) => return done(reader, writer, PumpEnd::ReadFailed(e)),
            },
        };

        let version = reader.meta.version;

        match reader.meta.kind_of(&frame) {
            Some(PacketKind::CustomPayloadC2s) if direction == Direction::ClientToBackend => {
                match frame.decode_as::<CustomPayloadC2s>(version) {
                    Ok(msg) => {
                        track_channels(&ctx.channels, &msg.channel, &msg.data);
                        ctx.shared
                            .callbacks()
                            .inner
                            .on_plugin_message(&ctx.profile, &msg.channel)
                            .await;
                    }
                    Err(e) => warn!("undecodable serverbound plugin message: {e:#}"),
                }
            }
            Some(PacketKind::CustomPayloadS2c) if direction == Direction::BackendToClient => {
                // Observation only; backend registrations are the new
                // backend's own business after a switch.
                if let Ok(msg) = frame.decode_as::<wharf_protocol::packets::CustomPayloadS2c>(version) {
                    ctx.shared
                        .callbacks()
                        .inner
                        .on_plugin_message(&ctx.profile, &msg.channel)
                        .await;
                }
            }
            Some(PacketKind::DisconnectS2c) if direction == Direction::BackendToClient => {
                let reason = frame
                    .decode_as::<DisconnectS2c>(version)
                    .map(|d| d.reason)
                    .ok();
                return done(reader, writer, PumpEnd::Disconnect(reason));
            }
            Some(PacketKind::StartConfigurationS2c)
                if direction == Direction::BackendToClient =>
            {
                return done(reader, writer, PumpEnd::EnterConfig);
            }
            _ => {}
        }

        if let Err(e) = writer.send_frame(&frame).await {
            return done(reader, writer, PumpEnd::WriteFailed(e));
        }

        // The old link is released only once the new backend has produced
        // a play-phase packet for the client.
        if direction == Direction::BackendToClient {
            if let Some(old) = ctx.old_link.lock().take() {
                drop(old);
            }
        }
    }
}

/// Applies a client (un)registration payload to the session's channel
/// set. Payloads are `\0`-separated channel names.
pub(crate) fn track_channels(channels: &ChannelSet, channel: &str, data: &[u8]) {
    let names = || {
        String::from_utf8_lossy(data)
            .split('\0')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>()
    };

    if is_register(channel) {
        let mut channels = channels.lock();
        for name in names() {
            channels.insert(name);
        }
    } else if is_unregister(channel) {
        let mut channels = channels.lock();
        for name in names() {
            channels.remove(&name);
        }
    }
}
