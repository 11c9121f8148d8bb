//! Configuration-state packets (1.20.2+).
//!
//! The configuration phase is mostly a relay concern: registry data, tags,
//! and feature flags stream through opaquely. The proxy only names the
//! packets that fence the phase off.

use std::io::Write;

use crate::{Packet, ProtocolVersion};

/// Tells the client the configuration phase is complete; the client
/// answers with [`FinishConfigurationC2s`] and both sides move to play.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FinishConfigurationS2c;

impl Packet for FinishConfigurationS2c {
    const NAME: &'static str = "FinishConfigurationS2c";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FinishConfigurationC2s;

impl Packet for FinishConfigurationC2s {
    const NAME: &'static str = "FinishConfigurationC2s";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}
