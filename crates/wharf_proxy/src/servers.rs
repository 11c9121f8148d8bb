//! The mutable set of named backends.
//!
//! Reads vastly outnumber writes, so the map is copy-on-write: reloads
//! publish a fresh snapshot and in-flight operations keep whatever
//! snapshot they captured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::forward::ForwardingMode;

/// A backend known to the proxy. Names are case-sensitive and unique.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RegisteredBackend {
    pub name: String,
    /// `host:port`, resolved at dial time.
    pub address: String,
    /// Per-backend forwarding override; `None` falls back to the global
    /// default.
    pub forwarding: Option<ForwardingMode>,
}

struct Snapshot {
    by_name: HashMap<String, RegisteredBackend>,
    /// The configured fallback list, in declaration order.
    fallbacks: Vec<String>,
}

/// See the module docs.
pub struct ServerMap {
    snapshot: RwLock<Arc<Snapshot>>,
    /// Rotates the fallback starting point so repeated selections spread
    /// load even without dynamic fallbacks.
    cursor: AtomicUsize,
}

impl ServerMap {
    pub fn new(servers: Vec<RegisteredBackend>, fallbacks: Vec<String>) -> Self {
        Self {
            snapshot: RwLock::new(Self::build(servers, fallbacks)),
            cursor: AtomicUsize::new(0),
        }
    }

    fn build(servers: Vec<RegisteredBackend>, fallbacks: Vec<String>) -> Arc<Snapshot> {
        let by_name = servers
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect::<HashMap<_, _>>();

        let fallbacks = fallbacks
            .into_iter()
            .filter(|name| by_name.contains_key(name))
            .collect();

        Arc::new(Snapshot { by_name, fallbacks })
    }

    pub fn get(&self, name: &str) -> Option<RegisteredBackend> {
        self.snapshot.read().by_name.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.snapshot.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fallbacks(&self) -> Vec<String> {
        self.snapshot.read().fallbacks.clone()
    }

    /// Publishes a new snapshot. Returns the names of backends that no
    /// longer exist, so their players can be evacuated.
    pub fn replace(
        &self,
        servers: Vec<RegisteredBackend>,
        fallbacks: Vec<String>,
    ) -> Vec<String> {
        let next = Self::build(servers, fallbacks);

        let mut guard = self.snapshot.write();
        let removed = guard
            .by_name
            .keys()
            .filter(|name| !next.by_name.contains_key(*name))
            .cloned()
            .collect();
        *guard = next;

        removed
    }

    /// The fallback backends to try for a session, best candidate first.
    ///
    /// In static mode the configured order is kept, rotated by a cursor so
    /// consecutive selections start at different entries. With dynamic
    /// fallbacks the least-populated backend wins and equal counts
    /// resolve in declaration order.
    pub fn fallback_candidates(
        &self,
        exclude: Option<&str>,
        dynamic: bool,
        count_on: impl Fn(&str) -> usize,
    ) -> Vec<RegisteredBackend> {
        let snapshot = self.snapshot.read().clone();

        let eligible: Vec<&String> = snapshot
            .fallbacks
            .iter()
            .filter(|name| Some(name.as_str()) != exclude)
            .collect();

        if eligible.is_empty() {
            return vec![];
        }

        let ordered: Vec<&String> = if dynamic {
            let mut with_counts: Vec<(usize, usize, &String)> = eligible
                .iter()
                .enumerate()
                .map(|(declared, name)| (count_on(name), declared, *name))
                .collect();
            with_counts.sort();
            with_counts.into_iter().map(|(_, _, name)| name).collect()
        } else {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
            eligible[start..].iter().chain(&eligible[..start]).copied().collect()
        };

        ordered
            .into_iter()
            .filter_map(|name| snapshot.by_name.get(name).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(names: &[&str]) -> ServerMap {
        let servers = names
            .iter()
            .map(|n| RegisteredBackend {
                name: (*n).to_owned(),
                address: format!("127.0.0.1:25{n}"),
                forwarding: None,
            })
            .collect();
        ServerMap::new(servers, names.iter().map(|n| (*n).to_owned()).collect())
    }

    #[test]
    fn dynamic_fallback_prefers_least_populated() {
        let map = map(&["a", "b", "c"]);
        let counts: HashMap<&str, usize> = [("a", 4), ("b", 2), ("c", 7)].into();

        let picked = map.fallback_candidates(None, true, |name| counts[name]);
        let names: Vec<_> = picked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn dynamic_ties_resolve_in_declaration_order() {
        let map = map(&["a", "b", "c"]);

        let picked = map.fallback_candidates(None, true, |_| 3);
        let names: Vec<_> = picked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn static_fallbacks_rotate() {
        let map = map(&["a", "b", "c"]);

        let first: Vec<_> = map
            .fallback_candidates(None, false, |_| 0)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let second: Vec<_> = map
            .fallback_candidates(None, false, |_| 0)
            .iter()
            .map(|s| s.name.clone())
            .collect();

        assert_eq!(first, ["a", "b", "c"]);
        assert_eq!(second, ["b", "c", "a"]);
    }

    #[test]
    fn current_server_is_excluded() {
        let map = map(&["a", "b"]);

        let picked = map.fallback_candidates(Some("a"), true, |_| 0);
        let names: Vec<_> = picked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b"]);
    }

    #[test]
    fn replace_reports_removed_backends() {
        let map = map(&["a", "b"]);

        let removed = map.replace(
            vec![RegisteredBackend {
                name: "b".into(),
                address: "127.0.0.1:1".into(),
                forwarding: None,
            }],
            vec!["b".into()],
        );

        assert_eq!(removed, ["a"]);
        assert!(map.get("a").is_none());
        assert!(map.get("b").is_some());
    }

    #[test]
    fn unknown_fallback_names_are_dropped() {
        let servers = vec![RegisteredBackend {
            name: "a".into(),
            address: "127.0.0.1:1".into(),
            forwarding: None,
        }];
        let map = ServerMap::new(servers, vec!["a".into(), "ghost".into()]);

        assert_eq!(map.fallbacks(), ["a"]);
    }
}
