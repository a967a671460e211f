//! Walks a rule sequence and dispatches each rule to `MixerIo` or the
//! `Scheduler`. Holds no state of its own between invocations — all
//! cross-call state (the pending outband tail) lives in the `Scheduler`.
//!
//! Grounded on `original_source/src/control.c`'s `rule_def_run`: the
//! `for (; rule; rule = rule->next)` walk over an intrusive list becomes
//! iteration over an index range into the entry's owned `Vec<RuleHandle>`.

use log::{debug, error, info};

use crate::error::ExecutionError;
use crate::mixerio::MixerIo;
use crate::model::{EntryHandle, Model, RuleAction, RuleType};
use crate::scheduler::{Scheduler, Tail};

/// What the caller (the event loop) must do after `Executor::run` returns.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The sequence ran to completion (possibly with some failed writes,
    /// which are only logged, per spec.md §4.4 item 1).
    Done,
    /// An `OutbandExecute` rule deferred the remainder of the sequence;
    /// the caller must arm a real timer for `delay_ms` (or fire as soon as
    /// idle, if zero) that eventually calls [`Executor::run_tail`] with
    /// `timer_id`.
    ArmTimer { timer_id: u64, delay_ms: u32 },
}

pub struct Executor<'a> {
    model: &'a mut Model,
    mixer: &'a dyn MixerIo,
    scheduler: &'a mut Scheduler,
    trace: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        model: &'a mut Model,
        mixer: &'a dyn MixerIo,
        scheduler: &'a mut Scheduler,
        trace: bool,
    ) -> Self {
        Self {
            model,
            mixer,
            scheduler,
            trace,
        }
    }

    /// Runs `entry`'s rules of `rule_type` from the start. Returns success
    /// with zero writes if the entry has no rules of that type (callers
    /// needing "unknown entry name" semantics check `Model::entry_by_name`
    /// themselves, per spec.md §4.5).
    pub fn run(&mut self, entry: EntryHandle, rule_type: RuleType) -> Result<Outcome, ExecutionError> {
        self.run_from(entry, rule_type, 0)
    }

    /// Re-entrant continuation used when a timer fires: runs the tail that
    /// was deferred by an earlier `OutbandExecute`, as a fresh top-level
    /// invocation (spec.md §4.3).
    pub fn run_tail(&mut self, tail: Tail) -> Result<Outcome, ExecutionError> {
        self.run_from(tail.entry, tail.rule_type, tail.start)
    }

    fn run_from(
        &mut self,
        entry: EntryHandle,
        rule_type: RuleType,
        start: usize,
    ) -> Result<Outcome, ExecutionError> {
        let rules = self.model.entry(entry).rules(rule_type).to_vec();
        let mut had_failure = false;

        for (offset, &rule_handle) in rules.iter().enumerate().skip(start) {
            let line = self.model.rule(rule_handle).line;
            match &self.model.rule(rule_handle).action {
                RuleAction::SetValue {
                    card,
                    element,
                    value,
                    ..
                } => {
                    let card = *card;
                    let element = *element;
                    let value = *value;
                    let numid = self.model.element(element).numid;
                    let Some(numid) = numid else {
                        debug!("line {line}: element not bound, skipping write");
                        continue;
                    };
                    let Some(card_num) = self.model.card(card).num else {
                        debug!("line {line}: card not bound, skipping write");
                        continue;
                    };
                    if self.trace {
                        info!("line {line}: set hw:{card_num},{numid} = {value}");
                    }
                    if let Err(err) = self.mixer.set(card_num, numid, value) {
                        error!("line {line}: mixer set failed: {err}");
                        had_failure = true;
                    }
                }
                RuleAction::OutbandExecute { delay_ms } => {
                    let delay_ms = *delay_ms;
                    let tail = Tail {
                        entry,
                        rule_type,
                        start: offset + 1,
                    };
                    let timer_id = self
                        .scheduler
                        .schedule(tail, delay_ms.max(0) as u32, self.trace)?;
                    return Ok(Outcome::ArmTimer {
                        timer_id,
                        delay_ms: delay_ms.max(0) as u32,
                    });
                }
                RuleAction::OutbandCancel => {
                    self.scheduler.cancel(self.trace);
                }
                RuleAction::Suspend { micros } => {
                    Scheduler::suspend(*micros, self.trace, line);
                }
            }
        }

        if had_failure {
            return Err(ExecutionError::MixerSet(crate::mixerio::MixerIoError::NoSuchCard(0)));
        }
        Ok(Outcome::Done)
    }

    /// Runs a card's default-rule sequence (spec.md §4.4 `apply_defaults`).
    pub fn apply_defaults(&mut self, card: crate::model::CardHandle) -> Result<(), ExecutionError> {
        let rules = self.model.card(card).defaults.clone();
        let mut had_failure = false;
        for rule_handle in rules {
            let line = self.model.rule(rule_handle).line;
            let RuleAction::SetValue {
                card, element, value, ..
            } = &self.model.rule(rule_handle).action
            else {
                continue;
            };
            let card_num = self.model.card(*card).num;
            let numid = self.model.element(*element).numid;
            let (Some(card_num), Some(numid)) = (card_num, numid) else {
                continue;
            };
            let value = *value;
            if let Err(err) = self.mixer.set(card_num, numid, value) {
                error!("line {line}: default write failed: {err}");
                had_failure = true;
            }
        }
        if had_failure {
            return Err(ExecutionError::MixerSet(crate::mixerio::MixerIoError::NoSuchCard(0)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixerio::{MixerEvent, MixerIoError};
    use crate::model::{Descriptor, Model, Pattern, ValueKind};
    use std::cell::RefCell;

    struct FakeMixer {
        writes: RefCell<Vec<(u32, u32, i64)>>,
        fail_numid: RefCell<Option<u32>>,
    }

    impl FakeMixer {
        fn new() -> Self {
            Self {
                writes: RefCell::new(Vec::new()),
                fail_numid: RefCell::new(None),
            }
        }
    }

    impl MixerIo for FakeMixer {
        fn enumerate(&mut self) -> Result<Vec<MixerEvent>, MixerIoError> {
            Ok(Vec::new())
        }
        fn watch(&mut self, _card_num: u32) -> Result<(), MixerIoError> {
            Ok(())
        }
        fn poll_events(&mut self) -> Result<Vec<MixerEvent>, MixerIoError> {
            Ok(Vec::new())
        }
        fn get(&self, _card_num: u32, _numid: u32) -> Result<i64, MixerIoError> {
            Ok(0)
        }
        fn set(&self, card_num: u32, numid: u32, value: i64) -> Result<(), MixerIoError> {
            if *self.fail_numid.borrow() == Some(numid) {
                return Err(MixerIoError::NoSuchElement(numid));
            }
            self.writes.borrow_mut().push((card_num, numid, value));
            Ok(())
        }
        fn descriptor(&self, _card_num: u32, _numid: u32) -> Result<(ValueKind, Descriptor), MixerIoError> {
            Ok((ValueKind::Int, Descriptor::Int { min: 0, max: 100, step: 0 }))
        }
    }

    fn bound_element(model: &mut Model, card_num: u32, numid: u32) -> (
        crate::model::CardHandle,
        crate::model::ElementHandle,
    ) {
        let card = model.define_card(Pattern::Any, Pattern::Any);
        model.card_mut(card).num = Some(card_num);
        let elem = model.define_element(
            card,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
        );
        model.element_mut(elem).numid = Some(numid);
        (card, elem)
    }

    /// Scenario 1: a single SetValue rule issues exactly one `set`.
    #[test]
    fn single_set_value_rule_issues_one_write() {
        let mut model = Model::new();
        let (card, elem) = bound_element(&mut model, 0, 7);
        let entry = model.define_entry("earpiece").unwrap();
        model.define_rule_set_value(entry, RuleType::Sink, card, elem, "50", 1);
        if let crate::model::RuleAction::SetValue { value, .. } =
            &mut model.rule_mut(model.entry(entry).rules(RuleType::Sink)[0]).action
        {
            *value = 50;
        }

        let mixer = FakeMixer::new();
        let mut scheduler = Scheduler::new();
        let mut exec = Executor::new(&mut model, &mixer, &mut scheduler, false);
        let outcome = exec.run(entry, RuleType::Sink).unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(*mixer.writes.borrow(), vec![(0, 7, 50)]);
    }

    /// Scenario 2: OutbandExecute defers the remainder; nothing runs
    /// until the timer fires.
    #[test]
    fn outband_execute_defers_remaining_rules() {
        let mut model = Model::new();
        let (card, elem) = bound_element(&mut model, 0, 7);
        let entry = model.define_entry("earpiece").unwrap();
        model.define_rule_outband(entry, RuleType::Sink, 200, 1).unwrap();
        let set_rule = model.define_rule_set_value(entry, RuleType::Sink, card, elem, "75", 2);
        if let crate::model::RuleAction::SetValue { value, .. } = &mut model.rule_mut(set_rule).action {
            *value = 75;
        }

        let mixer = FakeMixer::new();
        let mut scheduler = Scheduler::new();
        let mut exec = Executor::new(&mut model, &mixer, &mut scheduler, false);
        let outcome = exec.run(entry, RuleType::Sink).unwrap();
        let Outcome::ArmTimer { timer_id, delay_ms } = outcome else {
            panic!("expected ArmTimer");
        };
        assert_eq!(delay_ms, 200);
        assert!(mixer.writes.borrow().is_empty());

        let tail = scheduler.fire(timer_id).unwrap();
        let mut exec = Executor::new(&mut model, &mixer, &mut scheduler, false);
        exec.run_tail(tail).unwrap();
        assert_eq!(*mixer.writes.borrow(), vec![(0, 7, 75)]);
    }

    /// Scenario 3: cancelling before the timer fires yields zero writes
    /// from the deferred tail.
    #[test]
    fn cancel_before_fire_yields_no_writes() {
        let mut model = Model::new();
        let (card, elem) = bound_element(&mut model, 0, 7);
        let entry = model.define_entry("earpiece").unwrap();
        model.define_rule_outband(entry, RuleType::Sink, 200, 1).unwrap();
        let set_rule = model.define_rule_set_value(entry, RuleType::Sink, card, elem, "75", 2);
        if let crate::model::RuleAction::SetValue { value, .. } = &mut model.rule_mut(set_rule).action {
            *value = 75;
        }

        let mixer = FakeMixer::new();
        let mut scheduler = Scheduler::new();
        let mut exec = Executor::new(&mut model, &mixer, &mut scheduler, false);
        let Outcome::ArmTimer { timer_id, .. } = exec.run(entry, RuleType::Sink).unwrap() else {
            panic!("expected ArmTimer");
        };

        scheduler.cancel(false);
        assert!(scheduler.fire(timer_id).is_none());
        assert!(mixer.writes.borrow().is_empty());
    }

    #[test]
    fn mixer_failure_is_recorded_but_iteration_continues() {
        let mut model = Model::new();
        let (card, elem1) = bound_element(&mut model, 0, 7);
        let elem2 = model.define_element(
            card,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
        );
        model.element_mut(elem2).numid = Some(8);
        let entry = model.define_entry("earpiece").unwrap();
        let r1 = model.define_rule_set_value(entry, RuleType::Sink, card, elem1, "1", 1);
        let r2 = model.define_rule_set_value(entry, RuleType::Sink, card, elem2, "2", 2);
        if let crate::model::RuleAction::SetValue { value, .. } = &mut model.rule_mut(r1).action {
            *value = 1;
        }
        if let crate::model::RuleAction::SetValue { value, .. } = &mut model.rule_mut(r2).action {
            *value = 2;
        }

        let mixer = FakeMixer::new();
        *mixer.fail_numid.borrow_mut() = Some(7);
        let mut scheduler = Scheduler::new();
        let mut exec = Executor::new(&mut model, &mixer, &mut scheduler, false);
        let outcome = exec.run(entry, RuleType::Sink);
        assert!(outcome.is_err());
        assert_eq!(*mixer.writes.borrow(), vec![(0, 8, 2)]);
    }
}
