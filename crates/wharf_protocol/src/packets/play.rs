//! Play-state packets.
//!
//! The play state is a relay: nearly everything passes through as opaque
//! frames. The packets below are the exceptions — plugin messages (channel
//! registrations must be tracked across switches), disconnects (surfaced
//! to the session), the configuration re-entry pair, and the
//! JoinGame/Respawn pair used to reset a pre-1.20.2 client during a
//! backend switch.

use std::io::Write;

use anyhow::bail;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::var_int::VarInt;
use crate::version::ProtocolVersion as V;
use crate::{nbt, Decode, Encode, Packet, ProtocolVersion, Text};

fn encode_payload(data: &[u8], mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
    // 1.7 plugin messages carried an i16 length; 1.8+ run to end of frame.
    if version < V::V1_8 {
        w.write_i16::<BigEndian>(data.len() as i16)?;
    }
    Ok(w.write_all(data)?)
}

fn decode_payload(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Vec<u8>> {
    if version < V::V1_8 {
        let len = r.read_i16::<BigEndian>()?;
        anyhow::ensure!(len >= 0, "negative plugin message length");
        let len = len as usize;
        anyhow::ensure!(r.len() >= len, "truncated plugin message");
        let (data, rest) = r.split_at(len);
        *r = rest;
        Ok(data.to_vec())
    } else {
        Ok(std::mem::take(r).to_vec())
    }
}

/// A serverbound plugin message. Also used in the configuration state
/// (the registry maps the state-specific ID onto the same shape).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CustomPayloadC2s {
    pub channel: String,
    pub data: Vec<u8>,
}

impl Packet for CustomPayloadC2s {
    const NAME: &'static str = "CustomPayloadC2s";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        self.channel.encode(&mut w)?;
        encode_payload(&self.data, w, version)
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            channel: String::decode(r)?,
            data: decode_payload(r, version)?,
        })
    }
}

/// A clientbound plugin message.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CustomPayloadS2c {
    pub channel: String,
    pub data: Vec<u8>,
}

impl Packet for CustomPayloadS2c {
    const NAME: &'static str = "CustomPayloadS2c";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        self.channel.encode(&mut w)?;
        encode_payload(&self.data, w, version)
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            channel: String::decode(r)?,
            data: decode_payload(r, version)?,
        })
    }
}

/// Kick in the play or configuration state. JSON text through 1.20.2,
/// network NBT from 1.20.3.
#[derive(Clone, PartialEq, Debug)]
pub struct DisconnectS2c {
    pub reason: Text,
}

impl Packet for DisconnectS2c {
    const NAME: &'static str = "DisconnectS2c";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        if version >= V::V1_20_3 {
            self.reason.encode_network_nbt(w)
        } else {
            self.reason.to_json(version.json_dialect()).encode(&mut w)
        }
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        let reason = if version >= V::V1_20_3 {
            Text::new(nbt::read_network_text(r)?)
        } else {
            Text::from_json_lossy(<&str>::decode(r)?)
        };

        Ok(Self { reason })
    }
}

/// Orders a 1.20.2+ client back into the configuration state for a
/// transparent backend switch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StartConfigurationS2c;

impl Packet for StartConfigurationS2c {
    const NAME: &'static str = "StartConfigurationS2c";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// The client's acknowledgement of [`StartConfigurationS2c`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AcknowledgeConfigurationC2s;

impl Packet for AcknowledgeConfigurationC2s {
    const NAME: &'static str = "AcknowledgeConfigurationC2s";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// How a revision describes the dimension a player is in.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Dimension {
    /// Numeric ID, pre-1.16 (-1 nether, 0 overworld, 1 end).
    Id(i32),
    /// Dimension-type identifier, 1.16..<1.16.2 and 1.19+.
    Name(String),
    /// Raw named-NBT dimension data, 1.16.2..<1.19.
    Data(Vec<u8>),
}

/// The fields of the backend's JoinGame the proxy needs to synthesize a
/// client reset during a legacy (pre-1.20.2) backend switch. The packet
/// itself is relayed verbatim; this type only ever decodes.
#[derive(Clone, PartialEq, Debug)]
pub struct GameJoinS2c {
    pub entity_id: i32,
    pub is_hardcore: bool,
    pub game_mode: u8,
    pub previous_game_mode: i8,
    pub dimension: Dimension,
    pub world_name: Option<String>,
    pub difficulty: u8,
    pub hashed_seed: i64,
    pub level_type: Option<String>,
    pub is_debug: bool,
    pub is_flat: bool,
    pub death_location: Option<(String, i64)>,
    pub portal_cooldown: i32,
}

impl Packet for GameJoinS2c {
    const NAME: &'static str = "GameJoinS2c";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        // The proxy never re-encodes a JoinGame; the backend's original
        // frame is relayed byte-for-byte.
        bail!("GameJoinS2c is relayed verbatim, not re-encoded")
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        let entity_id = i32::decode(r)?;

        let (is_hardcore, game_mode) = if version >= V::V1_16_2 {
            (bool::decode(r)?, u8::decode(r)?)
        } else {
            let gm = u8::decode(r)?;
            (gm & 0x08 != 0, gm & !0x08)
        };

        let mut previous_game_mode = -1i8;
        let mut world_name = None;
        let mut is_debug = false;
        let mut is_flat = false;

        let dimension = if version >= V::V1_16 {
            previous_game_mode = i8::decode(r)?;

            let _world_names = Vec::<String>::decode(r)?;
            // Registry data; the client gets the backend's copy verbatim,
            // so the contents are irrelevant here.
            nbt::capture_named_root(r)?;

            let dimension = if (V::V1_16_2..V::V1_19).contains(&version) {
                Dimension::Data(nbt::capture_named_root(r)?.to_vec())
            } else {
                Dimension::Name(String::decode(r)?)
            };

            world_name = Some(String::decode(r)?);
            dimension
        } else if version >= V::V1_9_1 {
            Dimension::Id(i32::decode(r)?)
        } else {
            Dimension::Id(i32::from(i8::decode(r)?))
        };

        let difficulty = if version < V::V1_14 { u8::decode(r)? } else { 0 };

        let hashed_seed = if version >= V::V1_15 { i64::decode(r)? } else { 0 };

        if version >= V::V1_16_2 {
            let _max_players = VarInt::decode(r)?;
        } else {
            let _max_players = u8::decode(r)?;
        }

        let level_type = if version < V::V1_16 {
            Some(String::decode(r)?)
        } else {
            None
        };

        if version >= V::V1_14 {
            let _view_distance = VarInt::decode(r)?;
        }
        if version >= V::V1_18 {
            let _simulation_distance = VarInt::decode(r)?;
        }
        if version >= V::V1_8 {
            let _reduced_debug_info = bool::decode(r)?;
        }
        if version >= V::V1_15 {
            let _show_respawn_screen = bool::decode(r)?;
        }
        if version >= V::V1_16 {
            is_debug = bool::decode(r)?;
            is_flat = bool::decode(r)?;
        }

        let death_location = if version >= V::V1_19 {
            if bool::decode(r)? {
                Some((String::decode(r)?, i64::decode(r)?))
            } else {
                None
            }
        } else {
            None
        };

        let portal_cooldown = if version >= V::V1_20 {
            VarInt::decode(r)?.0
        } else {
            0
        };

        Ok(Self {
            entity_id,
            is_hardcore,
            game_mode,
            previous_game_mode,
            dimension,
            world_name,
            difficulty,
            hashed_seed,
            level_type,
            is_debug,
            is_flat,
            death_location,
            portal_cooldown,
        })
    }
}

/// A dimension change. Synthesized (never decoded) by the switch
/// coordinator to reset a pre-1.20.2 client's world state.
#[derive(Clone, PartialEq, Debug)]
pub struct RespawnS2c {
    pub dimension: Dimension,
    pub world_name: String,
    pub difficulty: u8,
    pub hashed_seed: i64,
    pub game_mode: u8,
    pub previous_game_mode: i8,
    pub level_type: String,
    pub is_debug: bool,
    pub is_flat: bool,
    /// 1.19.3+ bit flags for kept player data; `0` drops everything,
    /// which is what a fresh backend requires. Encoded as the
    /// `copy_metadata` boolean on 1.16 through 1.19.2.
    pub data_kept: u8,
    pub death_location: Option<(String, i64)>,
    pub portal_cooldown: i32,
}

impl RespawnS2c {
    /// Builds the reset packet from the new backend's JoinGame.
    pub fn from_game_join(join: &GameJoinS2c) -> Self {
        Self {
            dimension: join.dimension.clone(),
            world_name: join
                .world_name
                .clone()
                .unwrap_or_else(|| "minecraft:overworld".to_owned()),
            difficulty: join.difficulty,
            hashed_seed: join.hashed_seed,
            game_mode: join.game_mode,
            previous_game_mode: join.previous_game_mode,
            level_type: join
                .level_type
                .clone()
                .unwrap_or_else(|| "default".to_owned()),
            is_debug: join.is_debug,
            is_flat: join.is_flat,
            data_kept: 0,
            death_location: join.death_location.clone(),
            portal_cooldown: join.portal_cooldown,
        }
    }
}

impl Packet for RespawnS2c {
    const NAME: &'static str = "RespawnS2c";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        if version >= V::V1_16 {
            match &self.dimension {
                Dimension::Data(raw) if (V::V1_16_2..V::V1_19).contains(&version) => {
                    w.write_all(raw)?;
                }
                Dimension::Name(name) => name.encode(&mut w)?,
                other => bail!("dimension form {other:?} cannot be encoded for {version}"),
            }
            self.world_name.encode(&mut w)?;
        } else {
            match self.dimension {
                Dimension::Id(id) => id.encode(&mut w)?,
                ref other => bail!("dimension form {other:?} cannot be encoded for {version}"),
            }
        }

        if version < V::V1_14 {
            self.difficulty.encode(&mut w)?;
        }
        if version >= V::V1_15 {
            self.hashed_seed.encode(&mut w)?;
        }

        self.game_mode.encode(&mut w)?;

        if version >= V::V1_16 {
            self.previous_game_mode.encode(&mut w)?;
            self.is_debug.encode(&mut w)?;
            self.is_flat.encode(&mut w)?;

            if version >= V::V1_19_3 {
                self.data_kept.encode(&mut w)?;
            } else {
                (self.data_kept != 0).encode(&mut w)?;
            }
        } else {
            self.level_type.encode(&mut w)?;
        }

        if version >= V::V1_19 {
            match &self.death_location {
                Some((dim, pos)) => {
                    true.encode(&mut w)?;
                    dim.encode(&mut w)?;
                    pos.encode(&mut w)?;
                }
                None => false.encode(&mut w)?,
            }
        }

        if version >= V::V1_20 {
            VarInt(self.portal_cooldown).encode(w)?;
        }

        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        bail!("RespawnS2c is only synthesized by the proxy")
    }
}
