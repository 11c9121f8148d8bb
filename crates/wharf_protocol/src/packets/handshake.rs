use std::io::Write;

use anyhow::bail;

use crate::var_int::VarInt;
use crate::{Decode, Encode, Packet, ProtocolVersion};

/// The first packet of every connection. Carries the client's declared
/// protocol number and the state it intends to enter.
///
/// The address field is not bounded to the vanilla 255 characters because
/// legacy player-info forwarding smuggles `\0`-separated identity data
/// through it.
#[derive(Clone, PartialEq, Debug)]
pub struct HandshakeC2s {
    /// The raw protocol number. Kept as-is rather than a
    /// [`ProtocolVersion`] so unsupported clients can still be served a
    /// status response.
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: HandshakeNextState,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HandshakeNextState {
    Status,
    Login,
    /// 1.20.5+ server-transfer reconnect. Treated as a login for admission
    /// purposes.
    Transfer,
}

impl Packet for HandshakeC2s {
    const NAME: &'static str = "HandshakeC2s";

    fn encode(&self, mut w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        VarInt(self.protocol_version).encode(&mut w)?;
        self.server_address.encode(&mut w)?;
        self.server_port.encode(&mut w)?;

        let next = match self.next_state {
            HandshakeNextState::Status => 1,
            HandshakeNextState::Login => 2,
            HandshakeNextState::Transfer => 3,
        };
        VarInt(next).encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        let protocol_version = VarInt::decode(r)?.0;
        let server_address = String::decode(r)?;
        let server_port = u16::decode(r)?;

        let next_state = match VarInt::decode(r)?.0 {
            1 => HandshakeNextState::Status,
            2 => HandshakeNextState::Login,
            3 => HandshakeNextState::Transfer,
            n => bail!("invalid next state {n} in handshake"),
        };

        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }
}
