//! The administrative command surface.
//!
//! The core only defines the manager interface and registers thin
//! built-ins that delegate to core operations; richer command behavior
//! (tab completion, chat output formatting, permissions backends) lives
//! outside the proxy core.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::switch;
use crate::SharedProxy;

/// Who is dispatching a command, as a capability tag.
#[derive(Clone, Debug)]
pub enum CommandSource {
    Console,
    Player { uuid: Uuid, name: String },
}

impl CommandSource {
    /// The built-ins use a single coarse permission split; a permissions
    /// plugin can layer something finer through its own registrations.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Console)
    }
}

/// Feedback lines produced by a command execution.
pub type CommandOutput = Vec<String>;

pub trait Command: Send + Sync + 'static {
    fn execute(&self, proxy: &SharedProxy, source: &CommandSource, args: &[&str])
        -> CommandOutput;
}

impl<F> Command for F
where
    F: Fn(&SharedProxy, &CommandSource, &[&str]) -> CommandOutput + Send + Sync + 'static,
{
    fn execute(
        &self,
        proxy: &SharedProxy,
        source: &CommandSource,
        args: &[&str],
    ) -> CommandOutput {
        self(proxy, source, args)
    }
}

#[derive(Default)]
struct Table {
    /// alias -> canonical name
    aliases: HashMap<String, String>,
    handlers: HashMap<String, Arc<dyn Command>>,
}

/// Name-keyed command registrations, replaced wholesale on reload.
#[derive(Default)]
pub struct CommandManager {
    table: RwLock<Table>,
}

impl CommandManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn Command>, aliases: &[&str]) {
        let mut table = self.table.write();
        table.aliases.insert(name.to_owned(), name.to_owned());
        for alias in aliases {
            table.aliases.insert((*alias).to_owned(), name.to_owned());
        }
        table.handlers.insert(name.to_owned(), handler);
    }

    pub fn unregister(&self, name: &str) {
        let mut table = self.table.write();
        table.handlers.remove(name);
        table.aliases.retain(|_, canonical| canonical != name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.table.read().aliases.contains_key(name)
    }

    /// Dispatches a command line. Returns `None` when no command matches.
    pub fn dispatch(
        &self,
        proxy: &SharedProxy,
        source: &CommandSource,
        line: &str,
    ) -> Option<CommandOutput> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        let args: Vec<&str> = words.collect();

        let handler = {
            let table = self.table.read();
            let canonical = table.aliases.get(name)?;
            table.handlers.get(canonical)?.clone()
        };

        Some(handler.execute(proxy, source, &args))
    }

    pub fn clear(&self) {
        *self.table.write() = Table::default();
    }
}

/// Registers the built-in commands. Called at startup and again after
/// each reload, honoring `announce-proxy-commands`.
pub(crate) fn register_builtins(shared: &SharedProxy) {
    let commands = shared.commands();

    if !shared.config().announce_proxy_commands {
        for name in ["server", "send", "hub", "find", "showall", "velocity"] {
            commands.unregister(name);
        }
        return;
    }

    commands.register("server", Arc::new(cmd_server), &[]);
    commands.register("send", Arc::new(cmd_send), &[]);
    commands.register("hub", Arc::new(cmd_hub), &["lobby"]);
    commands.register("find", Arc::new(cmd_find), &[]);
    commands.register("showall", Arc::new(cmd_showall), &["glist"]);
    commands.register("velocity", Arc::new(cmd_velocity), &[]);
}

fn cmd_server(proxy: &SharedProxy, source: &CommandSource, args: &[&str]) -> CommandOutput {
    match (source, args) {
        (CommandSource::Player { uuid, .. }, [target]) => {
            let Some(handle) = proxy.players().by_uuid(*uuid) else {
                return vec!["you are not connected".into()];
            };
            match switch::request_switch(proxy, &handle, target, false) {
                Ok(()) => vec![format!("connecting you to {target}")],
                Err(e) => vec![e.to_string()],
            }
        }
        (CommandSource::Player { .. }, _) => {
            let mut names = proxy.servers().names();
            names.sort();
            vec![format!("servers: {}", names.join(", "))]
        }
        (CommandSource::Console, _) => vec!["/server is a player command".into()],
    }
}

fn cmd_send(proxy: &SharedProxy, source: &CommandSource, args: &[&str]) -> CommandOutput {
    if !source.is_privileged() {
        return vec!["you may not do that".into()];
    }

    let [player, target] = args else {
        return vec!["usage: send <player> <server>".into()];
    };

    let Some(handle) = proxy.players().by_name(player) else {
        return vec![format!("{player} is not online")];
    };

    match switch::request_switch(proxy, &handle, target, true) {
        Ok(()) => vec![format!("sending {player} to {target}")],
        Err(e) => vec![e.to_string()],
    }
}

fn cmd_hub(proxy: &SharedProxy, source: &CommandSource, _args: &[&str]) -> CommandOutput {
    let CommandSource::Player { uuid, .. } = source else {
        return vec!["/hub is a player command".into()];
    };

    let Some(handle) = proxy.players().by_uuid(*uuid) else {
        return vec!["you are not connected".into()];
    };

    let Some(hub) = proxy.servers().fallbacks().into_iter().next() else {
        return vec!["no fallback server is configured".into()];
    };

    match switch::request_switch(proxy, &handle, &hub, false) {
        Ok(()) => vec![format!("connecting you to {hub}")],
        Err(e) => vec![e.to_string()],
    }
}

fn cmd_find(proxy: &SharedProxy, _source: &CommandSource, args: &[&str]) -> CommandOutput {
    let [player] = args else {
        return vec!["usage: find <player>".into()];
    };

    match proxy.players().by_name(player) {
        Some(handle) => match handle.current_server() {
            Some(server) => vec![format!("{player} is on {server}")],
            None => vec![format!("{player} is connecting")],
        },
        None => vec![format!("{player} is not online")],
    }
}

fn cmd_showall(proxy: &SharedProxy, _source: &CommandSource, _args: &[&str]) -> CommandOutput {
    let mut out = vec![format!("{} players online", proxy.players().len())];
    for name in proxy.servers().names() {
        out.push(format!("  {name}: {} players", proxy.players().count_on(&name)));
    }
    out
}

fn cmd_velocity(proxy: &SharedProxy, source: &CommandSource, args: &[&str]) -> CommandOutput {
    match args {
        ["reload"] if source.is_privileged() => match proxy.reload() {
            Ok(()) => {
                info!("configuration reloaded by {source:?}");
                vec!["configuration reloaded".into()]
            }
            Err(e) => vec![format!("reload failed: {e:#}")],
        },
        _ => vec![format!(
            "{} proxy, {} players online",
            proxy.config().server_brand,
            proxy.players().len()
        )],
    }
}
