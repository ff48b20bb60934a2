//! Command text protocol.
//!
//! Console, web and MQTT commands share one textual form:
//!
//! ```text
//!   [<component-id>] <verb> [<args>]
//! ```
//!
//! The leading id is optional; commands without one go to `core`.  An args
//! value of `''` stands for an explicit empty string.

use serde_json::{Map, Value};

use crate::settings::SettingsAction;

/// Args spelling of an explicit empty value.
pub const EMPTY_ARGS: &str = "''";

/// `command` split at its first space, both halves trimmed.
pub fn split(command: &str) -> (&str, &str) {
    let command = command.trim();
    match command.split_once(' ') {
        Some((head, tail)) => (head, tail.trim()),
        None => (command, ""),
    }
}

/// A `<verb> [args]` command addressed to one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub verb: &'a str,
    /// Args with `''` already mapped to the empty string.
    pub args: &'a str,
    /// Whether the caller supplied a value, including `''`.
    pub has_value: bool,
}

impl<'a> ParsedCommand<'a> {
    pub fn parse(command: &'a str) -> Self {
        let (verb, raw) = split(command);
        let args = if raw == EMPTY_ARGS { "" } else { raw };
        Self {
            verb,
            args,
            has_value: !raw.is_empty(),
        }
    }

    /// Option action for a command no handler claimed.
    pub fn settings_action(&self) -> SettingsAction {
        if self.has_value {
            SettingsAction::Save
        } else {
            SettingsAction::Read
        }
    }
}

/// Text embedded as raw JSON when it parses as JSON and looks like an
/// object, otherwise as a string.
fn json_or_string(text: &str) -> Value {
    if text.contains('{') {
        if let Ok(v) = serde_json::from_str::<Value>(text) {
            return v;
        }
    }
    Value::String(text.to_owned())
}

/// `{"cmd": .., "payload": .., "result": ..}`; `payload` only when `args`
/// is non-empty.
pub fn response_json(cmd: &str, args: &str, result: &str) -> String {
    let mut obj = Map::new();
    obj.insert("cmd".into(), Value::String(cmd.to_owned()));
    if !args.is_empty() {
        obj.insert("payload".into(), json_or_string(args));
    }
    obj.insert("result".into(), json_or_string(result));
    Value::Object(obj).to_string()
}

/// Command carried by an inbound MQTT message: the last topic segment,
/// then a space and the payload when there is one.
pub fn command_from_message(topic: &str, payload: &str) -> Option<String> {
    let (_, verb) = topic.rsplit_once('/')?;
    if verb.is_empty() || verb == "#" {
        return None;
    }
    let payload = payload.trim();
    if payload.is_empty() {
        Some(verb.to_owned())
    } else {
        Some(format!("{} {}", verb, payload))
    }
}
