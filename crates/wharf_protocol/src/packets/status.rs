use std::io::Write;

use crate::{Decode, Encode, Packet, ProtocolVersion};

/// Asks for the status document. Empty body.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct QueryRequestC2s;

impl Packet for QueryRequestC2s {
    const NAME: &'static str = "QueryRequestC2s";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// The assembled status document, already serialized under the dialect
/// matching the client's declared version.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct QueryResponseS2c {
    pub json: String,
}

impl Packet for QueryResponseS2c {
    const NAME: &'static str = "QueryResponseS2c";

    fn encode(&self, w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.json.encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            json: String::decode(r)?,
        })
    }
}

/// An 8-byte nonce the client expects echoed back.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct QueryPingC2s {
    pub payload: i64,
}

impl Packet for QueryPingC2s {
    const NAME: &'static str = "QueryPingC2s";

    fn encode(&self, w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.payload.encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            payload: i64::decode(r)?,
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct QueryPongS2c {
    pub payload: i64,
}

impl Packet for QueryPongS2c {
    const NAME: &'static str = "QueryPongS2c";

    fn encode(&self, w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.payload.encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            payload: i64::decode(r)?,
        })
    }
}
