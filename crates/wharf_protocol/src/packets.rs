//! Typed packets, grouped by connection state.
//!
//! Only the packets the proxy itself originates, answers, or inspects are
//! defined here. Everything else rides through the relay as opaque
//! [`PacketFrame`](crate::PacketFrame)s and never takes a typed form.
//!
//! Layouts are written against the negotiated [`ProtocolVersion`]; a
//! single struct covers every revision of a packet, with version gates in
//! its codec where the wire format changed.
//!
//! [`ProtocolVersion`]: crate::ProtocolVersion

pub mod config;
pub mod handshake;
pub mod login;
pub mod play;
pub mod status;

pub use config::{FinishConfigurationC2s, FinishConfigurationS2c};
pub use handshake::{HandshakeC2s, HandshakeNextState};
pub use login::{
    LoginAcknowledgedC2s, LoginCompressionS2c, LoginDisconnectS2c, LoginHelloC2s, LoginHelloS2c,
    LoginKeyC2s, LoginQueryRequestS2c, LoginQueryResponseC2s, LoginSuccessS2c,
};
pub use play::{
    AcknowledgeConfigurationC2s, CustomPayloadC2s, CustomPayloadS2c, Dimension, DisconnectS2c,
    GameJoinS2c, RespawnS2c, StartConfigurationS2c,
};
pub use status::{QueryPingC2s, QueryPongS2c, QueryRequestC2s, QueryResponseS2c};
