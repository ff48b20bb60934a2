//! Settings and command dispatch.
//!
//! Three entry points share the option handler contract of
//! [`Component::handle_option`]:
//!
//! - [`dispatch_command`]: one `"<verb> [args]"` command.  The free-form
//!   handler is offered the verb first; otherwise the verb is an option key,
//!   saved when args are present and read when not.
//! - [`dispatch_settings`]: a form-style batch.  Every key is verified
//!   before any is saved, so an invalid batch mutates nothing.
//! - [`import_options`]: a JSON object applied key by key with `Save`.
//!
//! A successful `OkReinit` re-initialises the component; `OkRestart` is
//! never acted on synchronously and only publishes a pending restart.

use log::{debug, info, warn};
use serde_json::Value;

use crate::app::commands::{self, ParsedCommand};
use crate::component::Component;
use crate::config;
use crate::error::{Outcome, ResultCode, messages};
use crate::events::{Event, MessageBus, SystemEventKind};
use crate::registry::Registry;
use crate::settings::SettingsAction;

/// Pseudo-key carried by web forms to name the target component.
pub const MODULE_ID_KEY: &str = "module_id";

/// Apply the follow-up action a success tier asks for.
pub fn escalate(component: &mut dyn Component, bus: &MessageBus, code: ResultCode) {
    match code {
        ResultCode::OkRestart => {
            info!("Dispatch: '{}' requests a restart", component.id());
            bus.publish(&Event::System(SystemEventKind::PendingRestart));
        }
        ResultCode::OkReinit => {
            debug!("Dispatch: reinitialising '{}'", component.id());
            component.reinit();
        }
        _ => {}
    }
}

/// Run one command against `component` and publish the
/// `CommandResponse`.  Handled commands report `Ok` with the handler's
/// result as detail.
pub fn dispatch_command(component: &mut dyn Component, bus: &MessageBus, command: &str) -> Outcome {
    let parsed = ParsedCommand::parse(command);
    let outcome = match component.handle_command(parsed.verb, parsed.args) {
        Some(result) => Outcome::ok(result),
        None => {
            let outcome =
                component.handle_option(parsed.verb, parsed.args, parsed.settings_action());
            escalate(component, bus, outcome.code);
            outcome
        }
    };
    respond(component, bus, parsed.verb, parsed.args, &outcome.detail);
    outcome
}

fn respond(component: &dyn Component, bus: &MessageBus, verb: &str, args: &str, detail: &str) {
    bus.publish(&Event::CommandResponse {
        source: component.id().clone(),
        topic: component.id().to_string(),
        payload: commands::response_json(verb, args, detail),
    });
}

/// Route `command` to the component named by its first word, or to `core`
/// with the full text when no live component has that id.  `None` when
/// there is nowhere to route it.
pub fn route_command(registry: &mut Registry, command: &str) -> Option<Outcome> {
    let bus = registry.context().bus.clone();
    let (head, rest) = commands::split(command);
    if registry.contains(head) {
        return registry.execute(head, |c| dispatch_command(c, &bus, rest));
    }
    let routed = registry.execute(config::CORE_ID, |c| dispatch_command(c, &bus, command));
    if routed.is_none() {
        warn!("Dispatch: no route for '{}'", command);
    }
    routed
}

/// Verify every entry, then save every entry.  Returns the first
/// validation error untouched by any write, or the most severe success.
pub fn dispatch_settings(
    component: &mut dyn Component,
    bus: &MessageBus,
    entries: &[(String, String)],
) -> Outcome {
    let entries = || {
        entries
            .iter()
            .filter(|(k, _)| k != MODULE_ID_KEY)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    };

    for (key, value) in entries() {
        let result = component.handle_option(key, value, SettingsAction::Verify);
        match result.code {
            ResultCode::UnknownOption => {
                return Outcome::new(
                    ResultCode::UnknownOption,
                    format!("{} {}", messages::UNKNOWN_OPTION, key),
                );
            }
            ResultCode::InvalidValue => {
                return Outcome::new(
                    ResultCode::InvalidValue,
                    format!("{}{}", key, messages::SETTINGS_INVALID_VALUE),
                );
            }
            code if code.is_error() => return result,
            _ => {}
        }
    }

    let mut aggregate = ResultCode::Ok;
    for (key, value) in entries() {
        let result = component.handle_option(key, value, SettingsAction::Save);
        if result.is_error() {
            warn!("Dispatch: saving {}.{} failed: {}", component.id(), key, result);
            return result;
        }
        aggregate = aggregate.escalate(result.code);
    }

    escalate(component, bus, aggregate);
    Outcome::new(aggregate, messages::SETTINGS_APPLIED)
}

/// Apply a JSON object of options with `Save`, in key order.  Scalars are
/// passed in their textual form.  Returns the first error or the most
/// severe success; the caller applies escalation.
pub fn import_options(
    json: &str,
    mut handle: impl FnMut(&str, &str, SettingsAction) -> Outcome,
) -> Outcome {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(json) else {
        return Outcome::error(messages::INVALID_VALUE);
    };
    let mut aggregate = ResultCode::Ok;
    for (key, value) in &map {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let result = handle(key, &text, SettingsAction::Save);
        if result.is_error() {
            return result;
        }
        aggregate = aggregate.escalate(result.code);
    }
    Outcome::new(aggregate, messages::SETTINGS_APPLIED)
}
