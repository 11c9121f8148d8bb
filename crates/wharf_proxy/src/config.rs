//! The `velocity.toml` configuration document.
//!
//! The file is read once at startup and republished as a whole snapshot on
//! reload; code holding an `Arc<ProxyConfig>` keeps a consistent view for
//! the duration of one operation. A `config-version` field drives the
//! migration ladder for files written by older releases.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::prelude::*;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};
use wharf_protocol::ProtocolVersion;

use crate::forward::ForwardingMode;
use crate::servers::RegisteredBackend;

/// The version this release writes.
pub const CURRENT_CONFIG_VERSION: &str = "2.7";

/// Versions the migration ladder can lift to the current layout. Every
/// step so far only introduced new keys with defaults, so migration is a
/// warn-and-bump.
const MIGRATABLE_VERSIONS: &[&str] = &["1.0", "2.0", "2.5", "2.6"];

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    pub config_version: String,

    /// The address the listener binds. Not hot-reloadable.
    pub bind: String,
    pub motd: String,
    pub server_brand: String,
    /// Advertised in the status document; not an admission limit.
    pub show_max_players: i32,

    pub online_mode: bool,
    pub online_mode_kick_existing_players: bool,

    pub player_info_forwarding_mode: ForwardingMode,
    pub forwarding_secret: String,
    /// Per-backend forwarding override, falling back to the global mode.
    pub player_info_forwarding_overrides: HashMap<String, ForwardingMode>,

    #[serde(deserialize_with = "deserialize_version")]
    pub minimum_version: ProtocolVersion,

    pub enable_dynamic_fallbacks: bool,
    pub disable_forge: bool,
    pub enforce_chat_signing: bool,
    pub allow_illegal_characters_in_chat: bool,
    pub log_offline_connections: bool,

    /// -1 disables compression.
    pub compression_threshold: i32,
    pub compression_level: u32,

    /// Minimum milliseconds between login attempts per source IP; 0
    /// disables the limiter.
    pub login_ratelimit: u64,
    /// Backend dial timeout, milliseconds.
    pub connection_timeout: u64,
    /// Idle read timeout, milliseconds.
    pub read_timeout: u64,

    pub haproxy: bool,
    pub query_enabled: bool,
    pub query_port: u16,

    pub announce_proxy_commands: bool,
    /// Status `version.name` template served to unsupported clients.
    /// Substitutes `{proxy-brand}`, `{protocol-min}`, `{protocol-max}`.
    pub fallback_version_ping: String,

    /// Path to a 64x64 PNG; empty disables the favicon.
    pub favicon: String,
    /// Directory of message property files.
    pub lang_dir: String,

    pub servers: ServersSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServersSection {
    /// Fallback order for initial joins and evacuations.
    #[serde(rename = "try", default)]
    pub try_order: Vec<String>,
    /// name -> host:port
    #[serde(flatten)]
    pub entries: HashMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION.to_owned(),
            bind: "0.0.0.0:25577".to_owned(),
            motd: "\u{a7}3A wharf proxy".to_owned(),
            server_brand: "wharf".to_owned(),
            show_max_players: 500,
            online_mode: true,
            online_mode_kick_existing_players: false,
            player_info_forwarding_mode: ForwardingMode::None,
            forwarding_secret: String::new(),
            player_info_forwarding_overrides: HashMap::new(),
            minimum_version: ProtocolVersion::MINIMUM,
            enable_dynamic_fallbacks: false,
            disable_forge: false,
            enforce_chat_signing: true,
            allow_illegal_characters_in_chat: false,
            log_offline_connections: true,
            compression_threshold: 256,
            compression_level: 6,
            login_ratelimit: 3000,
            connection_timeout: 5000,
            read_timeout: 30000,
            haproxy: false,
            query_enabled: false,
            query_port: 25577,
            announce_proxy_commands: true,
            fallback_version_ping: "{proxy-brand} {protocol-min}-{protocol-max}".to_owned(),
            favicon: String::new(),
            lang_dir: "lang".to_owned(),
            servers: ServersSection::default(),
        }
    }
}

impl ProxyConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

        config.migrate()?;
        config.validate()?;
        Ok(config)
    }

    fn migrate(&mut self) -> anyhow::Result<()> {
        if self.config_version == CURRENT_CONFIG_VERSION {
            return Ok(());
        }

        if MIGRATABLE_VERSIONS.contains(&self.config_version.as_str()) {
            info!(
                from = %self.config_version,
                to = CURRENT_CONFIG_VERSION,
                "migrating configuration; new options take their defaults"
            );
            self.config_version = CURRENT_CONFIG_VERSION.to_owned();
            return Ok(());
        }

        bail!(
            "config-version {} is not understood by this proxy (expected {})",
            self.config_version,
            CURRENT_CONFIG_VERSION
        )
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;

        if self.compression_threshold < -1 {
            bail!("compression-threshold must be -1 (off) or non-negative");
        }
        if self.compression_level > 9 {
            bail!("compression-level must be between 0 and 9");
        }

        let needs_secret = |mode: ForwardingMode| {
            matches!(mode, ForwardingMode::BungeeGuard | ForwardingMode::Modern)
        };

        let secret_needed = needs_secret(self.player_info_forwarding_mode)
            || self
                .player_info_forwarding_overrides
                .values()
                .copied()
                .any(needs_secret);

        if secret_needed && self.forwarding_secret.is_empty() {
            bail!("bungeeguard/modern forwarding requires forwarding-secret");
        }

        for name in &self.servers.try_order {
            if !self.servers.entries.contains_key(name) {
                warn!("fallback entry {name:?} does not name a configured server");
            }
        }

        for name in self.player_info_forwarding_overrides.keys() {
            if !self.servers.entries.contains_key(name) {
                warn!("forwarding override for unknown server {name:?}");
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("bind address {:?} is not host:port", self.bind))
    }

    pub fn login_ratelimit_gap(&self) -> Duration {
        Duration::from_millis(self.login_ratelimit)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout.max(1))
    }

    /// The backend list with per-server forwarding overrides applied.
    pub fn backends(&self) -> Vec<RegisteredBackend> {
        self.servers
            .entries
            .iter()
            .map(|(name, address)| RegisteredBackend {
                name: name.clone(),
                address: address.clone(),
                forwarding: self.player_info_forwarding_overrides.get(name).copied(),
            })
            .collect()
    }

    /// Loads the configured favicon as a `data:` URI for the status
    /// document.
    pub fn load_favicon(&self) -> Option<String> {
        if self.favicon.is_empty() {
            return None;
        }

        match std::fs::read(&self.favicon) {
            Ok(png) => {
                let mut uri = "data:image/png;base64,".to_owned();
                BASE64_STANDARD.encode_string(png, &mut uri);
                Some(uri)
            }
            Err(e) => {
                warn!("failed to read favicon {:?}: {e}", self.favicon);
                None
            }
        }
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<ProtocolVersion, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i32),
        Name(String),
    }

    let raw = Raw::deserialize(deserializer)?;
    let found = match &raw {
        Raw::Number(n) => ProtocolVersion::from_number(*n),
        Raw::Name(name) => ProtocolVersion::ALL
            .iter()
            .copied()
            .find(|v| v.name() == name),
    };

    found.ok_or_else(|| {
        serde::de::Error::custom(match raw {
            Raw::Number(n) => format!("unknown protocol number {n}"),
            Raw::Name(name) => format!("unknown version name {name:?}"),
        })
    })
}

/// The file written when no configuration exists yet.
pub const DEFAULT_CONFIG: &str = r#"# wharf proxy configuration.

config-version = "2.7"

# The address the proxy listens on. Changing it requires a restart.
bind = "0.0.0.0:25577"

motd = "§3A wharf proxy"
server-brand = "wharf"
show-max-players = 500

# Authenticate players against the Mojang session service.
online-mode = true
online-mode-kick-existing-players = false

# How backends learn the real client identity:
# "none", "legacy", "bungeeguard", or "modern".
player-info-forwarding-mode = "none"
forwarding-secret = ""

# Oldest client version admitted to login. Status pings are always served.
minimum-version = "1.7.2"

enable-dynamic-fallbacks = false
compression-threshold = 256
compression-level = 6

# Milliseconds between login attempts per source IP. 0 disables.
login-ratelimit = 3000
connection-timeout = 5000
read-timeout = 30000

haproxy = false
query-enabled = false
query-port = 25577

announce-proxy-commands = true
fallback-version-ping = "{proxy-brand} {protocol-min}-{protocol-max}"

[servers]
lobby = "127.0.0.1:30066"
# Fallback order for initial joins and evacuations.
try = ["lobby"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_text_parses_to_defaults() {
        let parsed: ProxyConfig = toml::from_str(DEFAULT_CONFIG).unwrap();

        assert_eq!(parsed.bind, "0.0.0.0:25577");
        assert_eq!(parsed.compression_threshold, 256);
        assert_eq!(parsed.minimum_version, ProtocolVersion::V1_7_2);
        assert_eq!(parsed.servers.try_order, ["lobby"]);
        assert_eq!(
            parsed.servers.entries.get("lobby").map(String::as_str),
            Some("127.0.0.1:30066")
        );
    }

    #[test]
    fn minimum_version_accepts_name_or_number() {
        let by_name: ProxyConfig = toml::from_str(r#"minimum-version = "1.16""#).unwrap();
        assert_eq!(by_name.minimum_version, ProtocolVersion::V1_16);

        let by_number: ProxyConfig = toml::from_str("minimum-version = 763").unwrap();
        assert_eq!(by_number.minimum_version, ProtocolVersion::V1_20);

        assert!(toml::from_str::<ProxyConfig>(r#"minimum-version = "0.0""#).is_err());
    }

    #[test]
    fn secret_is_required_for_secured_forwarding() {
        let mut config = ProxyConfig {
            player_info_forwarding_mode: ForwardingMode::Modern,
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_err());

        config.forwarding_secret = "hunter2".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn migration_bumps_old_versions_and_rejects_unknown() {
        let mut old = ProxyConfig {
            config_version: "2.5".to_owned(),
            ..ProxyConfig::default()
        };
        old.migrate().unwrap();
        assert_eq!(old.config_version, CURRENT_CONFIG_VERSION);

        let mut unknown = ProxyConfig {
            config_version: "99.0".to_owned(),
            ..ProxyConfig::default()
        };
        assert!(unknown.migrate().is_err());
    }

    #[test]
    fn overrides_reach_registered_backends() {
        let toml_doc = r#"
            player-info-forwarding-mode = "legacy"
            forwarding-secret = "s"

            [player-info-forwarding-overrides]
            factions = "bungeeguard"

            [servers]
            lobby = "127.0.0.1:30066"
            factions = "127.0.0.1:30067"
            try = ["lobby"]
        "#;

        let config: ProxyConfig = toml::from_str(toml_doc).unwrap();
        let backends = config.backends();

        let factions = backends.iter().find(|b| b.name == "factions").unwrap();
        assert_eq!(factions.forwarding, Some(ForwardingMode::BungeeGuard));

        let lobby = backends.iter().find(|b| b.name == "lobby").unwrap();
        assert_eq!(lobby.forwarding, None);
    }
}
