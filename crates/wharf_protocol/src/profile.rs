use std::io::Write;

use anyhow::ensure;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Decode, Encode};

/// A property from the game profile. Typically contains a `textures`
/// property with the skin and cape of the player.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Encode for Property {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.name.encode(&mut w)?;
        self.value.encode(&mut w)?;
        self.signature.encode(w)
    }
}

impl Decode<'_> for Property {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            name: String::decode(r)?,
            value: String::decode(r)?,
            signature: Option::decode(r)?,
        })
    }
}

/// The identity a player logs in under: the UUID and username the session
/// service (or an offline derivation) assigned, plus profile properties.
///
/// This is also the shape of the session service's `hasJoined` response
/// body, hence the serde renames.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct GameProfile {
    #[serde(rename = "id")]
    pub uuid: Uuid,
    #[serde(rename = "name")]
    pub username: String,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl GameProfile {
    /// Derives the stable offline-mode profile for a username.
    pub fn offline(username: &str) -> anyhow::Result<Self> {
        ensure!(is_valid_username(username), "invalid username");

        Ok(Self {
            // Derive the client's UUID from a hash of their username.
            uuid: Uuid::from_slice(&Sha256::digest(username)[..16])?,
            username: username.to_owned(),
            properties: vec![],
        })
    }
}

/// Whether the given string meets the criteria for a valid Minecraft
/// username: 1 to 16 characters from `[a-zA-Z0-9_]`.
pub fn is_valid_username(username: &str) -> bool {
    (1..=16).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_validity() {
        assert!(is_valid_username("Notch"));
        assert!(is_valid_username("jeb_"));
        assert!(is_valid_username("a"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("seventeen_chars__"));
        assert!(!is_valid_username("space cadet"));
        assert!(!is_valid_username("émile"));
    }

    #[test]
    fn offline_profile_is_stable() {
        let a = GameProfile::offline("Alice").unwrap();
        let b = GameProfile::offline("Alice").unwrap();
        assert_eq!(a.uuid, b.uuid);
        assert!(a.properties.is_empty());
    }

    #[test]
    fn session_service_response_parses() {
        let json = r#"{
            "id": "af74a02d19cb445bb07f6866a861f783",
            "name": "Alice",
            "properties": [
                {"name": "textures", "value": "e30=", "signature": "sig"}
            ]
        }"#;

        let profile: GameProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.username, "Alice");
        assert_eq!(profile.properties.len(), 1);
        assert_eq!(
            profile.uuid,
            "af74a02d-19cb-445b-b07f-6866a861f783"
                .parse::<uuid::Uuid>()
                .unwrap()
        );
    }

    #[test]
    fn property_round_trip() {
        let prop = Property {
            name: "textures".into(),
            value: "dGV4dHVyZXM=".into(),
            signature: None,
        };

        let mut buf = vec![];
        prop.encode(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(Property::decode(&mut r).unwrap(), prop);
        assert!(r.is_empty());
    }
}
