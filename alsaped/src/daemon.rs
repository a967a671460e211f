//! The explicit state bundle threaded through the event loop, replacing
//! the original's file-static `priv` struct (spec.md Design Notes §9:
//! "model it as an explicit `Daemon` value ... do not hide it as ambient
//! state"). Owns the `Model`, `Scheduler`, `Dispatcher`, and the boxed
//! `MixerIo`/`PolicyBus` handles.

use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::binder;
use crate::dispatcher::Dispatcher;
use crate::error::ExecutionError;
use crate::executor::{Executor, Outcome};
use crate::mixerio::MixerIo;
use crate::model::Model;
use crate::policybus::PolicyBus;
use crate::scheduler::{Scheduler, Tail};

/// A timer the event loop must fire no earlier than `due`.
struct PendingTimer {
    id: u64,
    due: Instant,
}

pub struct Daemon {
    pub model: Model,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    mixer: Box<dyn MixerIo>,
    bus: Option<Box<dyn PolicyBus>>,
    pending_timer: Option<PendingTimer>,
    trace_rules: bool,
}

impl Daemon {
    pub fn new(model: Model, mixer: Box<dyn MixerIo>, bus: Option<Box<dyn PolicyBus>>, trace_rules: bool) -> Self {
        Self {
            model,
            scheduler: Scheduler::new(),
            dispatcher: Dispatcher::new(),
            mixer,
            bus,
            pending_timer: None,
            trace_rules,
        }
    }

    /// Enumerates hardware once, binding the static config model in
    /// place, and applying defaults as each card finishes enumeration.
    /// Used both by `--list` (enumerate then exit) and by the normal
    /// startup path before the bus is opened.
    pub fn enumerate_hardware(&mut self) -> Result<(), ExecutionError> {
        let events = self.mixer.enumerate().map_err(|e| {
            error!("hardware enumeration failed: {e}");
            ExecutionError::MixerSet(e)
        })?;

        for event in events {
            match binder::handle_event(&mut self.model, self.mixer.as_ref(), event) {
                Ok(Some(card)) => {
                    if let Err(err) = Executor::new(
                        &mut self.model,
                        self.mixer.as_ref(),
                        &mut self.scheduler,
                        self.trace_rules,
                    )
                    .apply_defaults(card)
                    {
                        error!("applying defaults failed: {err}");
                    }
                }
                Ok(None) => {}
                Err(err) => error!("bind error: {err}"),
            }
        }
        Ok(())
    }

    fn run_outcome(&mut self, outcome: Outcome) {
        if let Outcome::ArmTimer { timer_id, delay_ms } = outcome {
            self.pending_timer = Some(PendingTimer {
                id: timer_id,
                due: Instant::now() + Duration::from_millis(delay_ms as u64),
            });
        }
    }

    fn fire_due_timer(&mut self) {
        let Some(pending) = &self.pending_timer else {
            return;
        };
        if Instant::now() < pending.due {
            return;
        }
        let id = pending.id;
        self.pending_timer = None;
        let Some(tail): Option<Tail> = self.scheduler.fire(id) else {
            return;
        };
        let outcome = Executor::new(&mut self.model, self.mixer.as_ref(), &mut self.scheduler, self.trace_rules)
            .run_tail(tail);
        match outcome {
            Ok(outcome) => {
                if self.trace_rules {
                    info!("outband execution of rules succeeded");
                }
                self.run_outcome(outcome);
            }
            Err(err) => error!("outband execution of rules failed: {err}"),
        }
    }

    /// Opens the policy bus and runs the cooperative event loop until a
    /// shutdown signal is observed. Mirrors `alsaped.c`'s
    /// `g_main_loop_run`, generalized past GLib's source-based
    /// multiplexing into a short poll cycle over this process's three
    /// event sources (spec.md §5): the bus, the mixer, and the scheduler's
    /// pending timer.
    pub fn run_event_loop(
        &mut self,
        shutdown: &std::sync::atomic::AtomicBool,
        interactive: Option<&std::sync::mpsc::Receiver<char>>,
    ) -> Result<(), anyhow::Error> {
        use std::sync::atomic::Ordering;

        let Some(mut bus) = self.bus.take() else {
            anyhow::bail!("policy bus was not opened");
        };
        bus.connect()?;

        info!("started");
        while !shutdown.load(Ordering::Relaxed) {
            if let Some(rx) = interactive {
                while let Ok(cmd) = rx.try_recv() {
                    self.handle_interactive_command(cmd);
                }
            }

            for (txid, actions) in bus.poll_actions()? {
                let mut ok = true;
                for action in actions {
                    match self.dispatcher.handle(
                        &mut self.model,
                        self.mixer.as_ref(),
                        &mut self.scheduler,
                        self.trace_rules,
                        action,
                    ) {
                        Ok(outcome) => self.run_outcome(outcome),
                        Err(err) => {
                            error!("action execution failed: {err}");
                            ok = false;
                        }
                    }
                }
                bus.send_status(txid, ok)?;
            }

            for event in self.mixer.poll_events().unwrap_or_default() {
                match binder::handle_event(&mut self.model, self.mixer.as_ref(), event) {
                    Ok(Some(card)) => {
                        if let Err(err) = Executor::new(
                            &mut self.model,
                            self.mixer.as_ref(),
                            &mut self.scheduler,
                            self.trace_rules,
                        )
                        .apply_defaults(card)
                        {
                            error!("applying defaults failed: {err}");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => debug!("bind error: {err}"),
                }
            }

            self.fire_due_timer();
            std::thread::sleep(Duration::from_millis(20));
        }
        info!("exiting now ...");
        Ok(())
    }

    /// Manual single-character test commands, hardcoded to `card_num=0,
    /// numid=1` for the volume keys per `alsaped.c`'s `stdin_handler` —
    /// spec.md Open Questions notes this is debug-only and need not
    /// generalize past that hardcoding.
    fn handle_interactive_command(&mut self, cmd: char) {
        const VOLUME_CARD: u32 = 0;
        const VOLUME_NUMID: u32 = 1;

        match cmd {
            '+' | '-' => {
                let current = self.mixer.get(VOLUME_CARD, VOLUME_NUMID).unwrap_or(0);
                let delta = if cmd == '+' { 5 } else { -5 };
                let next = (current + delta).clamp(0, 50);
                if let Err(err) = self.mixer.set(VOLUME_CARD, VOLUME_NUMID, next) {
                    error!("interactive volume set failed: {err}");
                }
            }
            'V' => match self.mixer.get(VOLUME_CARD, VOLUME_NUMID) {
                Ok(value) => println!("value = {value}"),
                Err(err) => error!("interactive volume get failed: {err}"),
            },
            'E' | 'H' | 'I' => {
                let name = match cmd {
                    'E' => "earpiece",
                    'H' => "headset",
                    _ => "ihf",
                };
                if let Some(entry) = self.model.entry_by_name(name) {
                    let outcome = Executor::new(
                        &mut self.model,
                        self.mixer.as_ref(),
                        &mut self.scheduler,
                        self.trace_rules,
                    )
                    .run(entry, crate::model::RuleType::Sink);
                    match outcome {
                        Ok(outcome) => self.run_outcome(outcome),
                        Err(err) => error!("interactive route to '{name}' failed: {err}"),
                    }
                }
            }
            _ => {}
        }
    }
}
