//! Fuzz target: command text and MQTT message parsing
//!
//! Feeds arbitrary UTF-8 through the command splitter, the response
//! builder and the topic/payload mapper, verifying:
//! - No panics on any input
//! - Verbs never contain a space
//! - Every response is a JSON object with a `cmd` field
//!
//! cargo fuzz run fuzz_command_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use modhub::app::commands::{self, ParsedCommand};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };

    let (id, rest) = commands::split(text);
    assert!(!id.contains(' '), "split produced a verb with a space");

    let parsed = ParsedCommand::parse(rest);
    assert!(!parsed.verb.contains(' '));
    if parsed.args.is_empty() && parsed.has_value {
        assert_eq!(rest.trim().split_once(' ').map(|(_, a)| a.trim()), Some(commands::EMPTY_ARGS));
    }

    let out = commands::response_json(parsed.verb, parsed.args, text);
    let value: serde_json::Value = serde_json::from_str(&out).expect("response is not JSON");
    assert_eq!(value["cmd"].as_str(), Some(parsed.verb));

    // First line is the topic, the remainder the payload.
    let (topic, payload) = text.split_once('\n').unwrap_or((text, ""));
    if let Some(command) = commands::command_from_message(topic, payload) {
        assert!(!command.is_empty());
        assert!(!command.starts_with(' '));
    }
});
