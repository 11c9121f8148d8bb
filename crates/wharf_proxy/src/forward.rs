//! Player-identity forwarding toward backends.
//!
//! Four strategies tell a backend who the real client is:
//!
//! - `NONE` — the backend sees the proxy's socket as the player.
//! - `LEGACY` — BungeeCord-style: identity is smuggled through the
//!   handshake address as `host\0ip\0uuid\0propertiesJson`. Unsecured.
//! - `BUNGEEGUARD` — the legacy payload plus a shared-secret token hidden
//!   among the profile properties, which the backend verifies.
//! - `MODERN` — a login-plugin round trip on `velocity:player_info`
//!   carrying an HMAC-SHA256-signed payload. Requires 1.13+.

use std::net::IpAddr;

use anyhow::{bail, Context};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use wharf_protocol::{Encode, GameProfile, Property, ProtocolVersion};

/// The plugin channel modern forwarding negotiates on.
pub const MODERN_FORWARDING_CHANNEL: &str = "velocity:player_info";

/// Payload version 1: address, UUID, username, and properties. Later
/// versions add chat-key material the proxy does not emit.
pub const MODERN_FORWARDING_VERSION: i32 = 1;

/// The property name BungeeGuard backends look for.
pub const BUNGEEGUARD_TOKEN_PROPERTY: &str = "bungeeguard-token";

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    #[default]
    #[serde(alias = "NONE")]
    None,
    #[serde(alias = "LEGACY")]
    Legacy,
    #[serde(alias = "BUNGEEGUARD")]
    BungeeGuard,
    #[serde(alias = "MODERN")]
    Modern,
}

impl ForwardingMode {
    /// Modern forwarding rides on login-plugin messages, which only exist
    /// from 1.13.
    pub fn supports(self, version: ProtocolVersion) -> bool {
        match self {
            Self::Modern => version >= ProtocolVersion::V1_13,
            _ => true,
        }
    }
}

/// Builds the handshake address field for the legacy strategies.
pub fn legacy_handshake_address(
    host: &str,
    client_ip: IpAddr,
    profile: &GameProfile,
    bungeeguard_secret: Option<&str>,
) -> anyhow::Result<String> {
    let mut properties = profile.properties.clone();

    if let Some(secret) = bungeeguard_secret {
        properties.push(Property {
            name: BUNGEEGUARD_TOKEN_PROPERTY.to_owned(),
            value: secret.to_owned(),
            signature: None,
        });
    }

    let properties_json =
        serde_json::to_string(&properties).context("serializing forwarded properties")?;

    Ok(format!(
        "{host}\0{ip}\0{uuid}\0{properties_json}",
        ip = client_ip,
        uuid = profile.uuid.simple(),
    ))
}

/// Builds the signed response body for a modern-forwarding login-plugin
/// query: `HMAC-SHA256(secret, data) || data`.
pub fn modern_forwarding_payload(
    secret: &str,
    client_ip: IpAddr,
    profile: &GameProfile,
) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();

    wharf_protocol::VarInt(MODERN_FORWARDING_VERSION).encode(&mut data)?;
    client_ip.to_string().encode(&mut data)?;
    profile.uuid.encode(&mut data)?;
    profile.username.encode(&mut data)?;
    profile.properties.encode(&mut data)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("forwarding secret unusable as HMAC key")?;
    mac.update(&data);
    let signature = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(signature.len() + data.len());
    out.extend_from_slice(&signature);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Checks a modern-forwarding query from the backend: version byte must be
/// one the proxy can answer.
pub fn check_modern_forwarding_request(data: &[u8]) -> anyhow::Result<()> {
    let requested = *data.first().context("empty forwarding request")?;

    if i32::from(requested) < MODERN_FORWARDING_VERSION {
        bail!("backend requested unsupported forwarding version {requested}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use wharf_protocol::Decode;

    use super::*;

    fn alice() -> GameProfile {
        GameProfile {
            uuid: "af74a02d-19cb-445b-b07f-6866a861f783".parse().unwrap(),
            username: "Alice".into(),
            properties: vec![],
        }
    }

    #[test]
    fn legacy_address_layout() {
        let addr = legacy_handshake_address(
            "backend.internal",
            "203.0.113.5".parse().unwrap(),
            &alice(),
            None,
        )
        .unwrap();

        assert_eq!(
            addr,
            "backend.internal\0203.0.113.5\0af74a02d19cb445bb07f6866a861f783\0[]"
        );
    }

    #[test]
    fn bungeeguard_token_rides_in_properties() {
        let addr = legacy_handshake_address(
            "backend.internal",
            "203.0.113.5".parse().unwrap(),
            &alice(),
            Some("s3cret"),
        )
        .unwrap();

        let (head, json) = addr.rsplit_once('\0').unwrap();
        assert_eq!(
            head,
            "backend.internal\0203.0.113.5\0af74a02d19cb445bb07f6866a861f783"
        );
        assert_eq!(
            json,
            r#"[{"name":"bungeeguard-token","value":"s3cret"}]"#
        );
    }

    #[test]
    fn modern_payload_verifies_and_decodes() {
        let secret = "forwarding-secret";
        let payload =
            modern_forwarding_payload(secret, "203.0.113.5".parse().unwrap(), &alice()).unwrap();

        // The receiving side's procedure: split off the signature, verify,
        // then decode the fields.
        let (signature, mut data) = payload.split_at(32);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(data);
        mac.verify_slice(signature).unwrap();

        assert_eq!(
            wharf_protocol::VarInt::decode(&mut data).unwrap().0,
            MODERN_FORWARDING_VERSION
        );
        assert_eq!(<&str>::decode(&mut data).unwrap(), "203.0.113.5");
        assert_eq!(Uuid::decode(&mut data).unwrap(), alice().uuid);
        assert_eq!(<&str>::decode(&mut data).unwrap(), "Alice");
        assert_eq!(Vec::<Property>::decode(&mut data).unwrap(), vec![]);
        assert!(data.is_empty());
    }

    #[test]
    fn tampered_modern_payload_fails_verification() {
        let secret = "forwarding-secret";
        let mut payload =
            modern_forwarding_payload(secret, "203.0.113.5".parse().unwrap(), &alice()).unwrap();
        *payload.last_mut().unwrap() ^= 1;

        let (signature, data) = payload.split_at(32);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(data);
        assert!(mac.verify_slice(signature).is_err());
    }

    #[test]
    fn modern_requires_1_13() {
        assert!(!ForwardingMode::Modern.supports(ProtocolVersion::V1_12_2));
        assert!(ForwardingMode::Modern.supports(ProtocolVersion::V1_13));
        assert!(ForwardingMode::Legacy.supports(ProtocolVersion::V1_7_2));
    }

    #[test]
    fn mode_names_parse_in_either_case() {
        #[derive(Deserialize)]
        struct Holder {
            mode: ForwardingMode,
        }

        for (input, expected) in [
            ("\"none\"", ForwardingMode::None),
            ("\"LEGACY\"", ForwardingMode::Legacy),
            ("\"bungeeguard\"", ForwardingMode::BungeeGuard),
            ("\"MODERN\"", ForwardingMode::Modern),
        ] {
            let holder: Holder = toml::from_str(&format!("mode = {input}")).unwrap();
            assert_eq!(holder.mode, expected);
        }
    }
}
