//! Cooperative main-loop scheduler.
//!
//! One call to [`Scheduler::step`] is one run-to-completion iteration:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  step()                                                      │
//! │    1. pump()        every component with needs_poll_pump     │
//! │    2. tick(phase)   every needs_periodic_tick component,     │
//! │                     once per 100 ms boundary, phase 0..9     │
//! │    3. sleep         STATIC: full quantum                     │
//! │                     DYNAMIC: quantum minus active time       │
//! │    4. load          active / (active + idle) → SystemState   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Components are visited in registry order (most recent first).  There is
//! no preemption: a hook that does not return stalls the device until the
//! hardware watchdog fires.

use embedded_hal::delay::DelayNs;
use log::trace;

use crate::app::ports::Clock;
use crate::component::TickPhase;
use crate::config;
use crate::diagnostics::LoadMeter;
use crate::registry::Registry;
use crate::settings::SleepMode;

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    /// Phase passed to `tick`, when a 100 ms boundary was crossed.
    pub ticked: Option<TickPhase>,
    pub active_us: u64,
    pub slept_ms: u32,
}

/// Milliseconds to sleep after an iteration that was busy for `active_us`.
pub fn sleep_for(mode: SleepMode, quantum_ms: u8, active_us: u64) -> u32 {
    let quantum = u32::from(quantum_ms);
    match mode {
        SleepMode::Static => quantum,
        SleepMode::Dynamic => {
            let active_ms = u32::try_from(active_us / 1000).unwrap_or(u32::MAX);
            quantum.saturating_sub(active_ms)
        }
    }
}

pub struct Scheduler<C: Clock, D: DelayNs> {
    clock: C,
    delay: D,
    phase: TickPhase,
    next_tick_ms: u64,
    load: LoadMeter,
}

impl<C: Clock, D: DelayNs> Scheduler<C, D> {
    pub fn new(clock: C, delay: D) -> Self {
        let next_tick_ms = clock.now_ms() + config::TICK_INTERVAL_MS;
        Self {
            clock,
            delay,
            phase: TickPhase::default(),
            next_tick_ms,
            load: LoadMeter::new(),
        }
    }

    /// Phase the next tick will carry.
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn step(&mut self, registry: &mut Registry) -> Iteration {
        let start_us = self.clock.now_us();

        registry.for_each(|c| {
            if c.capabilities().needs_poll_pump {
                c.pump();
            }
        });

        let now_ms = self.clock.now_ms();
        let ticked = if now_ms >= self.next_tick_ms {
            self.next_tick_ms += config::TICK_INTERVAL_MS;
            if self.next_tick_ms <= now_ms {
                // fell behind by more than one period; do not burst
                self.next_tick_ms = now_ms + config::TICK_INTERVAL_MS;
            }
            let phase = self.phase;
            registry.for_each(|c| {
                if c.capabilities().needs_periodic_tick {
                    c.tick(phase);
                }
            });
            self.phase = phase.next();
            Some(phase)
        } else {
            None
        };

        let active_us = self.clock.now_us().saturating_sub(start_us);
        let ctx = registry.context();
        let quantum_ms = ctx.settings.sleep_time_ms();
        let slept_ms = if quantum_ms > 0 {
            sleep_for(ctx.settings.sleep_mode(), quantum_ms, active_us)
        } else {
            0
        };
        if slept_ms > 0 {
            self.delay.delay_ms(slept_ms);
        }

        let load = self.load.record(active_us, u64::from(slept_ms) * 1000);
        ctx.state.set_cpu_load(load);
        ctx.state.set_uptime_ms(self.clock.now_ms());
        if let Some(phase) = ticked {
            trace!("Scheduler: tick {} load {}%", phase.value(), load);
        }

        Iteration {
            ticked,
            active_us,
            slept_ms,
        }
    }
}
