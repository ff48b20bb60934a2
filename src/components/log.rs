//! Log viewer component.  Announces new lines in the log ring once per
//! second and serves them on request.

use serde_json::json;

use crate::adapters::log_sink::LogRing;
use crate::component::{Capabilities, Component, ComponentId, Context, TickPhase};
use crate::config;
use crate::events::Event;

pub struct LogComponent {
    id: ComponentId,
    ctx: Context,
    ring: LogRing,
    seen: u64,
}

impl LogComponent {
    pub fn new(ctx: &Context, ring: LogRing) -> Self {
        Self {
            id: ComponentId::from_static(config::LOG_ID),
            ctx: ctx.clone(),
            seen: ring.sequence(),
            ring,
        }
    }
}

impl Component for LogComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Log"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            needs_periodic_tick: true,
            exposes_status_page: true,
            ..Capabilities::default()
        }
    }

    fn tick(&mut self, phase: TickPhase) {
        if !phase.is(config::LOG_UPDATE_PHASE) {
            return;
        }
        let sequence = self.ring.sequence();
        if sequence != self.seen {
            self.seen = sequence;
            self.ctx.bus.publish(&Event::LogUpdate);
        }
    }

    fn handle_command(&mut self, verb: &str, _args: &str) -> Option<String> {
        (verb == "lines").then(|| json!({ "lines": self.ring.lines() }).to_string())
    }
}
