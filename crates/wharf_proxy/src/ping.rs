//! Status (server list ping) document assembly.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;
use wharf_protocol::version::JsonDialect;
use wharf_protocol::{ProtocolVersion, Text};

use crate::config::ProxyConfig;

/// An individual entry in the player sample shown when hovering the
/// player count.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerSampleEntry {
    pub name: String,
    pub id: Uuid,
}

/// The assembled status document, mutable by observers before
/// serialization.
#[derive(Clone, Debug)]
pub struct StatusResponse {
    pub version_name: String,
    pub protocol: i32,
    pub online_players: i32,
    pub max_players: i32,
    pub player_sample: Vec<PlayerSampleEntry>,
    pub description: Text,
    pub favicon: Option<String>,
}

impl StatusResponse {
    /// Builds the response for a client that declared `client_protocol`.
    ///
    /// A supported protocol is echoed back so the client shows the server
    /// as compatible. Unsupported protocols get the configured
    /// fallback-version template and the proxy's own maximum, which
    /// renders as an incompatible-version entry.
    pub fn build(
        config: &ProxyConfig,
        client_protocol: i32,
        online_players: i32,
        player_sample: Vec<PlayerSampleEntry>,
        favicon: Option<String>,
    ) -> Self {
        let supported = ProtocolVersion::from_number(client_protocol)
            .filter(|v| *v >= config.minimum_version);

        let (version_name, protocol) = match supported {
            Some(_) => (config.server_brand.clone(), client_protocol),
            None => (
                config
                    .fallback_version_ping
                    .replace("{proxy-brand}", &config.server_brand)
                    .replace("{protocol-min}", config.minimum_version.name())
                    .replace("{protocol-max}", ProtocolVersion::MAXIMUM.name()),
                ProtocolVersion::MAXIMUM.number(),
            ),
        };

        Self {
            version_name,
            protocol,
            online_players,
            max_players: config.show_max_players,
            player_sample,
            description: Text::from_legacy(&config.motd),
            favicon,
        }
    }

    /// Serializes under the JSON dialect matching the client's declared
    /// protocol number (clamped for versions outside the supported range).
    pub fn to_json(&self, client_protocol: i32) -> String {
        let dialect = dialect_for_number(client_protocol);

        let mut doc = json!({
            "version": {
                "name": self.version_name,
                "protocol": self.protocol,
            },
            "players": {
                "online": self.online_players,
                "max": self.max_players,
                "sample": self.player_sample,
            },
            "description": self.description.to_json_value(dialect),
        });

        if let Some(favicon) = &self.favicon {
            doc["favicon"] = Value::String(favicon.clone());
        }

        doc.to_string()
    }
}

fn dialect_for_number(protocol: i32) -> JsonDialect {
    match ProtocolVersion::from_number(protocol) {
        Some(version) => version.json_dialect(),
        // Newer than we speak: assume the newest dialect. Older or
        // unknown: the most conservative one.
        None if protocol > ProtocolVersion::MAXIMUM.number() => JsonDialect::Modern,
        None => JsonDialect::Legacy,
    }
}
