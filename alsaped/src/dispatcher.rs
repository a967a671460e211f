//! Receives decoded [`Action`]s from the policy bus, deduplicates repeated
//! identical routes, maps them to entries, and runs them through the
//! [`Executor`].
//!
//! Grounded on `original_source/src/control.c`'s `audio_actions_cb`: the
//! two `static char *source_route`/`sink_route` locals become owned
//! `Option<String>` fields threaded through `&mut self` instead of file
//! statics.

use log::info;

use crate::error::ExecutionError;
use crate::executor::{Executor, Outcome};
use crate::mixerio::MixerIo;
use crate::model::{Model, RuleType};
use crate::policybus::Action;
use crate::scheduler::Scheduler;

#[derive(Default)]
pub struct Dispatcher {
    last_sink: Option<String>,
    last_source: Option<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(
        &mut self,
        model: &mut Model,
        mixer: &dyn MixerIo,
        scheduler: &mut Scheduler,
        trace: bool,
        action: Action,
    ) -> Result<Outcome, ExecutionError> {
        match action {
            Action::RouteSink { device } => {
                self.route(model, mixer, scheduler, trace, RuleType::Sink, device, false)
            }
            Action::RouteSource { device } => {
                self.route(model, mixer, scheduler, trace, RuleType::Source, device, true)
            }
            Action::ContextSet { variable, value } => {
                let name = format!("{variable}-{value}");
                info!("setting context '{name}'");
                self.run_entry(model, mixer, scheduler, trace, RuleType::Context, &name)
            }
        }
    }

    fn route(
        &mut self,
        model: &mut Model,
        mixer: &dyn MixerIo,
        scheduler: &mut Scheduler,
        trace: bool,
        rule_type: RuleType,
        device: String,
        is_source: bool,
    ) -> Result<Outcome, ExecutionError> {
        let memo = if is_source {
            &mut self.last_source
        } else {
            &mut self.last_sink
        };
        let kind = if is_source { "source" } else { "sink" };

        if memo.as_deref() == Some(device.as_str()) {
            info!("ignoring {kind} route to '{device}'. route already in use.");
            return Ok(Outcome::Done);
        }

        *memo = Some(device.clone());
        info!("routing {kind} to '{device}'");
        self.run_entry(model, mixer, scheduler, trace, rule_type, &device)
    }

    fn run_entry(
        &mut self,
        model: &mut Model,
        mixer: &dyn MixerIo,
        scheduler: &mut Scheduler,
        trace: bool,
        rule_type: RuleType,
        entry_name: &str,
    ) -> Result<Outcome, ExecutionError> {
        let Some(entry) = model.entry_by_name(entry_name) else {
            // Unknown entry names are not errors; they resolve to a no-op
            // success (spec.md §4.5).
            return Ok(Outcome::Done);
        };
        Executor::new(model, mixer, scheduler, trace).run(entry, rule_type)
    }
}
