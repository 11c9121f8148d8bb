//! Localized proxy messages.
//!
//! Messages live in `lang/*.properties` files of `key = value` lines with
//! `{placeholder}` substitution. Anything not overridden falls back to the
//! compiled-in defaults, so a missing directory is not an error.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};
use wharf_protocol::Text;

const DEFAULTS: &[(&str, &str)] = &[
    ("disconnect.duplicate-login", "You logged in from another location"),
    ("disconnect.lost-connection", "Lost connection to the server"),
    ("disconnect.no-fallback", "Unable to connect you to a server"),
    ("disconnect.too-fast", "You are logging in too fast, try again later"),
    (
        "disconnect.unsupported-version",
        "This proxy requires at least version {minimum}",
    ),
    ("disconnect.auth-failed", "Could not verify your username"),
    ("disconnect.proxy-shutdown", "Proxy shutting down"),
    ("disconnect.already-connected", "You are already connected to this proxy"),
    ("disconnect.forge-disabled", "This proxy does not accept modified clients"),
];

/// An immutable message table; reloads publish a fresh one.
pub struct Messages {
    entries: HashMap<String, String>,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            entries: DEFAULTS
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

impl Messages {
    /// Loads every `.properties` file in `dir` over the defaults. Files
    /// merge in lexicographic order so later names win deterministically.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let mut messages = Self::default();
        let dir = dir.as_ref();

        let Ok(entries) = std::fs::read_dir(dir) else {
            debug!("no message directory at {}, using defaults", dir.display());
            return messages;
        };

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "properties"))
            .collect();
        paths.sort();

        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(contents) => messages.merge(&contents),
                Err(e) => warn!("skipping {}: {e}", path.display()),
            }
        }

        messages
    }

    fn merge(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                self.entries
                    .insert(key.trim().to_owned(), value.trim().to_owned());
            }
        }
    }

    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        self.entries.get(key).map_or(key, String::as_str)
    }

    /// Formats a message with `{name}` placeholders substituted, as a
    /// legacy-code-aware text component.
    pub fn format(&self, key: &str, args: &[(&str, &str)]) -> Text {
        let mut out = self.get(key).to_owned();
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        Text::from_legacy(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kick_path() {
        let messages = Messages::default();
        for (key, _) in DEFAULTS {
            assert_ne!(messages.get(key), *key, "missing default for {key}");
        }
    }

    #[test]
    fn placeholders_substitute() {
        let messages = Messages::default();
        let text = messages.format("disconnect.unsupported-version", &[("minimum", "1.8")]);
        assert_eq!(text.flatten(), "This proxy requires at least version 1.8");
    }

    #[test]
    fn merge_overrides_and_ignores_comments() {
        let mut messages = Messages::default();
        messages.merge(
            "# comment\n\
             disconnect.too-fast = Slow down!\n\
             custom.key = hello {who}\n",
        );

        assert_eq!(messages.get("disconnect.too-fast"), "Slow down!");
        assert_eq!(
            messages.format("custom.key", &[("who", "world")]).flatten(),
            "hello world"
        );
        // Unknown keys echo themselves rather than panicking.
        assert_eq!(messages.get("nope"), "nope");
    }
}
