//! Packet-ID registries.
//!
//! For every ([`ProtocolVersion`], [`PacketState`], [`PacketSide`]) the
//! registry holds a bijection between numeric packet IDs and the packet
//! kinds the proxy understands. IDs are recorded as monotonic chains
//! ("from version `v` onward the ID is `x`") and materialized into flat
//! per-version tables once, at startup; lookups afterwards are O(1) on
//! shared immutable data.
//!
//! Kinds absent from a (state, side) table are unknown to the proxy. In
//! the PLAY state unknown IDs are relayed opaquely; in the disciplined
//! states (handshake, status, login, configuration) the session treats
//! them as protocol violations.

use std::collections::HashMap;

use crate::version::ProtocolVersion;
use crate::{PacketSide, PacketState};

/// Every packet the proxy can name. Suffixes follow wire direction:
/// `C2s` packets travel serverbound, `S2c` clientbound.
///
/// A kind may be registered in more than one state with different IDs
/// (plugin messages and keep-alives exist in both configuration and play).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PacketKind {
    // Handshake.
    HandshakeC2s,

    // Status.
    QueryRequestC2s,
    QueryPingC2s,
    QueryResponseS2c,
    QueryPongS2c,

    // Login.
    LoginHelloC2s,
    LoginKeyC2s,
    LoginQueryResponseC2s,
    LoginAcknowledgedC2s,
    LoginDisconnectS2c,
    LoginHelloS2c,
    LoginSuccessS2c,
    LoginCompressionS2c,
    LoginQueryRequestS2c,

    // Configuration and play.
    CustomPayloadC2s,
    CustomPayloadS2c,
    FinishConfigurationC2s,
    FinishConfigurationS2c,
    KeepAliveC2s,
    KeepAliveS2c,
    DisconnectS2c,

    // Play only.
    AcknowledgeConfigurationC2s,
    StartConfigurationS2c,
    GameJoinS2c,
    RespawnS2c,
}

struct Registration {
    state: PacketState,
    side: PacketSide,
    kind: PacketKind,
    /// `(version, id)` pairs, oldest first: from `version` onward the
    /// packet uses `id`, until a later pair supersedes it.
    ids: &'static [(ProtocolVersion, i32)],
}

/// Immutable ID lookup tables, built once at proxy startup and shared by
/// reference between all sessions.
pub struct PacketRegistry {
    by_id: HashMap<(PacketState, PacketSide, ProtocolVersion, i32), PacketKind>,
    by_kind: HashMap<(PacketState, PacketSide, ProtocolVersion, PacketKind), i32>,
}

macro_rules! mapping {
    ($regs:expr; $state:ident, $side:ident, $kind:ident; $(($ver:ident, $id:literal)),+ $(,)?) => {
        $regs.push(Registration {
            state: PacketState::$state,
            side: PacketSide::$side,
            kind: PacketKind::$kind,
            ids: &[$((ProtocolVersion::$ver, $id)),+],
        })
    };
}

impl PacketRegistry {
    pub fn new() -> Self {
        let mut regs = Vec::new();

        mapping!(regs; Handshaking, Serverbound, HandshakeC2s; (V1_7_2, 0x00));

        mapping!(regs; Status, Serverbound, QueryRequestC2s; (V1_7_2, 0x00));
        mapping!(regs; Status, Serverbound, QueryPingC2s; (V1_7_2, 0x01));
        mapping!(regs; Status, Clientbound, QueryResponseS2c; (V1_7_2, 0x00));
        mapping!(regs; Status, Clientbound, QueryPongS2c; (V1_7_2, 0x01));

        mapping!(regs; Login, Serverbound, LoginHelloC2s; (V1_7_2, 0x00));
        mapping!(regs; Login, Serverbound, LoginKeyC2s; (V1_7_2, 0x01));
        mapping!(regs; Login, Serverbound, LoginQueryResponseC2s; (V1_13, 0x02));
        mapping!(regs; Login, Serverbound, LoginAcknowledgedC2s; (V1_20_2, 0x03));
        mapping!(regs; Login, Clientbound, LoginDisconnectS2c; (V1_7_2, 0x00));
        mapping!(regs; Login, Clientbound, LoginHelloS2c; (V1_7_2, 0x01));
        mapping!(regs; Login, Clientbound, LoginSuccessS2c; (V1_7_2, 0x02));
        mapping!(regs; Login, Clientbound, LoginCompressionS2c; (V1_8, 0x03));
        mapping!(regs; Login, Clientbound, LoginQueryRequestS2c; (V1_13, 0x04));

        mapping!(regs; Configuration, Serverbound, CustomPayloadC2s;
            (V1_20_2, 0x01), (V1_20_5, 0x02));
        mapping!(regs; Configuration, Serverbound, FinishConfigurationC2s;
            (V1_20_2, 0x02), (V1_20_5, 0x03));
        mapping!(regs; Configuration, Serverbound, KeepAliveC2s;
            (V1_20_2, 0x03), (V1_20_5, 0x04));
        mapping!(regs; Configuration, Clientbound, CustomPayloadS2c;
            (V1_20_2, 0x00), (V1_20_5, 0x01));
        mapping!(regs; Configuration, Clientbound, DisconnectS2c;
            (V1_20_2, 0x01), (V1_20_5, 0x02));
        mapping!(regs; Configuration, Clientbound, FinishConfigurationS2c;
            (V1_20_2, 0x02), (V1_20_5, 0x03));
        mapping!(regs; Configuration, Clientbound, KeepAliveS2c;
            (V1_20_2, 0x03), (V1_20_5, 0x04));

        mapping!(regs; Play, Serverbound, CustomPayloadC2s;
            (V1_7_2, 0x17), (V1_9, 0x09), (V1_12, 0x0a), (V1_12_1, 0x09),
            (V1_13, 0x0a), (V1_14, 0x0b), (V1_17, 0x0a), (V1_19, 0x0c),
            (V1_19_1, 0x0d), (V1_19_3, 0x0c), (V1_19_4, 0x0d),
            (V1_20_2, 0x0f), (V1_20_3, 0x10), (V1_20_5, 0x12));
        mapping!(regs; Play, Serverbound, KeepAliveC2s;
            (V1_7_2, 0x00), (V1_9, 0x0b), (V1_12, 0x0c), (V1_12_1, 0x0b),
            (V1_13, 0x0e), (V1_14, 0x0f), (V1_16, 0x10), (V1_17, 0x0f),
            (V1_19, 0x11), (V1_19_1, 0x12), (V1_19_3, 0x11), (V1_19_4, 0x12),
            (V1_20_2, 0x14), (V1_20_3, 0x15), (V1_20_5, 0x18));
        mapping!(regs; Play, Serverbound, AcknowledgeConfigurationC2s;
            (V1_20_2, 0x0b), (V1_20_5, 0x0c));
        mapping!(regs; Play, Clientbound, CustomPayloadS2c;
            (V1_7_2, 0x3f), (V1_9, 0x18), (V1_13, 0x19), (V1_14, 0x18),
            (V1_15, 0x19), (V1_16, 0x18), (V1_16_2, 0x17), (V1_17, 0x18),
            (V1_19, 0x15), (V1_19_1, 0x16), (V1_19_3, 0x15), (V1_19_4, 0x17),
            (V1_20_2, 0x18), (V1_20_5, 0x19));
        mapping!(regs; Play, Clientbound, DisconnectS2c;
            (V1_7_2, 0x40), (V1_9, 0x1a), (V1_13, 0x1b), (V1_14, 0x1a),
            (V1_15, 0x1b), (V1_16, 0x1a), (V1_16_2, 0x19), (V1_17, 0x1a),
            (V1_19, 0x17), (V1_19_1, 0x19), (V1_19_3, 0x17), (V1_19_4, 0x1a),
            (V1_20_2, 0x1b), (V1_20_5, 0x1d));
        mapping!(regs; Play, Clientbound, KeepAliveS2c;
            (V1_7_2, 0x00), (V1_9, 0x1f), (V1_13, 0x21), (V1_14, 0x20),
            (V1_15, 0x21), (V1_16, 0x20), (V1_16_2, 0x1f), (V1_17, 0x21),
            (V1_19, 0x1e), (V1_19_1, 0x20), (V1_19_3, 0x1f), (V1_19_4, 0x23),
            (V1_20_2, 0x24), (V1_20_5, 0x26));
        mapping!(regs; Play, Clientbound, StartConfigurationS2c;
            (V1_20_2, 0x65), (V1_20_3, 0x67), (V1_20_5, 0x69));
        mapping!(regs; Play, Clientbound, GameJoinS2c;
            (V1_7_2, 0x01), (V1_9, 0x23), (V1_13, 0x25), (V1_15, 0x26),
            (V1_16, 0x25), (V1_16_2, 0x24), (V1_17, 0x26), (V1_19, 0x23),
            (V1_19_1, 0x25), (V1_19_3, 0x24), (V1_19_4, 0x28),
            (V1_20_2, 0x29), (V1_20_5, 0x2b));
        mapping!(regs; Play, Clientbound, RespawnS2c;
            (V1_7_2, 0x07), (V1_9, 0x33), (V1_12, 0x34), (V1_12_1, 0x35),
            (V1_13, 0x38), (V1_14, 0x3a), (V1_15, 0x3b), (V1_16, 0x3a),
            (V1_16_2, 0x39), (V1_17, 0x3d), (V1_19, 0x3b), (V1_19_1, 0x3e),
            (V1_19_3, 0x3d), (V1_19_4, 0x41), (V1_20_2, 0x43),
            (V1_20_3, 0x45), (V1_20_5, 0x47));

        Self::materialize(&regs)
    }

    /// Flattens the registration chains into per-version tables. The
    /// bijection invariant (one ID per kind, one kind per ID) is asserted
    /// here so a bad table is caught at startup rather than mid-relay.
    fn materialize(regs: &[Registration]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_kind = HashMap::new();

        for reg in regs {
            debug_assert!(reg.ids.windows(2).all(|w| w[0].0 < w[1].0));

            for &version in ProtocolVersion::ALL {
                // The last chain entry at or below this version wins.
                let Some(&(_, id)) = reg
                    .ids
                    .iter()
                    .rev()
                    .find(|(since, _)| *since <= version)
                else {
                    continue;
                };

                let prev = by_id.insert((reg.state, reg.side, version, id), reg.kind);
                assert!(
                    prev.is_none(),
                    "duplicate packet ID {id:#04x} in {:?}/{:?} for {version}",
                    reg.state,
                    reg.side,
                );

                let prev = by_kind.insert((reg.state, reg.side, version, reg.kind), id);
                assert!(
                    prev.is_none(),
                    "kind {:?} registered twice in {:?}/{:?} for {version}",
                    reg.kind,
                    reg.state,
                    reg.side,
                );
            }
        }

        Self { by_id, by_kind }
    }

    /// The ID `kind` uses in the given state/side for `version`, or `None`
    /// if the packet does not exist there.
    pub fn packet_id(
        &self,
        version: ProtocolVersion,
        state: PacketState,
        side: PacketSide,
        kind: PacketKind,
    ) -> Option<i32> {
        self.by_kind.get(&(state, side, version, kind)).copied()
    }

    /// The kind behind a decoded frame's ID, or `None` for packets the
    /// proxy does not name.
    pub fn packet_kind(
        &self,
        version: ProtocolVersion,
        state: PacketState,
        side: PacketSide,
        id: i32,
    ) -> Option<PacketKind> {
        self.by_id.get(&(state, side, version, id)).copied()
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
