use std::sync::Arc;

use crate::error::{ErrorKind, PeerError, Result};
use crate::session::Session;

/// A command handler: receives the session and the argument string.
pub type Handler<S> = Arc<dyn Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync>;

/// A notification hook for `RESET`, `CANCEL`, `BYE`, `INPUT` and `OUTPUT`.
pub type NotifyHook<S> = Arc<dyn Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync>;

/// Called after every command with its final result.
pub type PostCommandHook<S> = Arc<dyn Fn(&mut Session<S>, &Result<()>) + Send + Sync>;

/// Receives `OPTION` name/value pairs.
pub type OptionHandler<S> = Arc<dyn Fn(&mut Session<S>, &str, &str) -> Result<()> + Send + Sync>;

/// A registered command.
pub struct CommandEntry<S> {
    name: String,
    handler: Handler<S>,
    help: Option<String>,
}

impl<S> CommandEntry<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub(crate) fn handler(&self) -> Handler<S> {
        Arc::clone(&self.handler)
    }
}

impl<S> Clone for CommandEntry<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
            help: self.help.clone(),
        }
    }
}

impl<S> std::fmt::Debug for CommandEntry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("help", &self.help.is_some())
            .finish()
    }
}

/// Name-to-handler table in registration order.
///
/// Lookup tries an exact match first, then a case-insensitive one; within
/// each pass the most recent registration wins.
pub struct CommandTable<S> {
    entries: Vec<CommandEntry<S>>,
}

impl<S> CommandTable<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: &str, handler: Handler<S>, help: Option<&str>) -> Result<()> {
        if name.is_empty() {
            return Err(PeerError::with_detail(
                ErrorKind::InvalidValue,
                "command name must not be empty",
            ));
        }
        self.entries.push(CommandEntry {
            name: name.to_string(),
            handler,
            help: help.map(str::to_string),
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandEntry<S>> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.entries
                    .iter()
                    .rev()
                    .find(|entry| entry.name.eq_ignore_ascii_case(name))
            })
    }

    /// Case-insensitive lookup only.
    pub fn lookup_ignore_case(&self, name: &str) -> Option<&CommandEntry<S>> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry<S>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a command line into its name and argument string.
///
/// The name ends at the first space or tab; leading whitespace of the
/// argument string is dropped. A line starting with whitespace has no name.
pub fn split_command(line: &str) -> Result<(&str, &str)> {
    let end = line.find([' ', '\t']).unwrap_or(line.len());
    if end == 0 {
        return Err(PeerError::syntax("leading white-space"));
    }
    let (name, rest) = line.split_at(end);
    Ok((name, rest.trim_start_matches([' ', '\t'])))
}
