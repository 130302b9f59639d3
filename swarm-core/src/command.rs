//! User commands handed from an input thread to the client loop.
//!
//! The input side only parses; every command is applied on the loop's thread by
//! [`ClientLoop::handle_command`](crate::client::ClientLoop::handle_command).

use crate::identity::PeerId;

/// A peer named on the console: numeric id or alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    Id(PeerId),
    Alias(String),
}

impl PeerTarget {
    /// Non-zero decimal is an id; anything else is an alias.
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<PeerId>() {
            Ok(id) if id.is_valid() => PeerTarget::Id(id),
            _ => PeerTarget::Alias(s.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(PeerTarget),
    Disconnect(PeerTarget),
    Chat(String),
    RegisterAlias(String),
    /// `None` drops all of our aliases.
    UnregisterAlias(Option<String>),
    LookupAlias(String),
    Quit,
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Help,
    Empty,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
}

pub const HELP: &str = "\
Available commands:
  /peer #       : Connect to a peer by ID
  /disconnect # : Disconnect from a peer by ID
  /alias name   : Register an alias of name for this peer
  /unalias name : Unregister a specific alias name for this peer
  /unalias      : Unregister all aliases for this peer
  /lookup name  : Lookup an alias
  /quit         : Quit the application
  /help         : Print this help";

/// Parse one console line. Slash commands are case-insensitive; anything else is chat
/// and keeps its case.
pub fn parse_line(line: &str) -> Result<Input, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Input::Empty);
    }
    if !line.starts_with('/') {
        return Ok(Input::Command(Command::Chat(line.to_string())));
    }
    let lower = line.trim().to_lowercase();
    let (verb, arg) = match lower.split_once(' ') {
        Some((v, a)) => (v, Some(a.trim()).filter(|a| !a.is_empty())),
        None => (lower.as_str(), None),
    };
    let cmd = match (verb, arg) {
        ("/quit", _) => Command::Quit,
        ("/help", _) => return Ok(Input::Help),
        ("/peer", Some(a)) => Command::Connect(PeerTarget::parse(a)),
        ("/peer", None) => return Err(CommandError::MissingArgument("/peer")),
        ("/disconnect", Some(a)) => Command::Disconnect(PeerTarget::parse(a)),
        ("/disconnect", None) => return Err(CommandError::MissingArgument("/disconnect")),
        ("/alias", Some(a)) => Command::RegisterAlias(a.to_string()),
        ("/alias", None) => return Err(CommandError::MissingArgument("/alias")),
        ("/unalias", a) => Command::UnregisterAlias(a.map(str::to_string)),
        ("/lookup", Some(a)) => Command::LookupAlias(a.to_string()),
        ("/lookup", None) => return Err(CommandError::MissingArgument("/lookup")),
        _ => return Err(CommandError::Unknown(lower.clone())),
    };
    Ok(Input::Command(cmd))
}
