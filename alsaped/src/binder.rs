//! Binds the declarative [`Model`] to live hardware: matches incoming
//! [`MixerEvent`]s against unbound cards/elements by pattern, records the
//! kernel-assigned `num`/`numid`, queries the element's value descriptor,
//! and resolves each element's SetValue rule chain into concrete integers.
//!
//! Grounded on `original_source/src/control.c`'s `alsa_event_cb`: card
//! binding checks "already bound to this num" before falling back to
//! pattern search, and element binding does the same by numid.

use log::{debug, error};

use crate::error::BindError;
use crate::mixerio::{MixerEvent, MixerIo};
use crate::model::{Descriptor, Model};
use crate::value;

/// Applies one [`MixerEvent`] to `model`, returning the card that just
/// finished hardware enumeration on [`MixerEvent::ControlsAdded`] so the
/// caller can run its default rules; `None` otherwise.
pub fn handle_event(
    model: &mut Model,
    mixer: &dyn MixerIo,
    event: MixerEvent,
) -> Result<Option<crate::model::CardHandle>, BindError> {
    match event {
        MixerEvent::CardAdded { num, id, name } => {
            card_added(model, num, &id, &name);
            Ok(None)
        }
        MixerEvent::ControlsAdded { num } => Ok(controls_added(model, num)),
        MixerEvent::ElementAdded {
            card_num,
            numid,
            interface,
            name,
            index,
            device,
            subdevice,
        } => {
            element_added(
                model, mixer, card_num, numid, &interface, &name, index, device, subdevice,
            )?;
            Ok(None)
        }
        MixerEvent::ElementChanged { card_num, numid } => {
            debug!("element {numid} on card {card_num} changed value (informational)");
            Ok(None)
        }
    }
}

/// A card already bound to `num` takes precedence over pattern matching
/// (mirrors `card_def_find_by_num` being checked before the wildcard scan
/// in `alsa_event_cb`'s `EVENT_SOUNDCARD_ADDED` case).
fn card_added(model: &mut Model, num: u32, id: &str, name: &str) {
    if let Some((_, bound)) = model.cards().find(|(_, c)| c.num == Some(num)) {
        if !bound.id.matches(&id.to_string()) || !bound.name.matches(&name.to_string()) {
            error!("{}", BindError::ConfusedDuplicateCard { num });
        }
        return;
    }

    let target = model
        .cards()
        .find(|(_, c)| {
            c.num.is_none()
                && c.id.matches(&id.to_string())
                && c.name.matches(&name.to_string())
        })
        .map(|(h, _)| h);

    if let Some(handle) = target {
        model.card_mut(handle).num = Some(num);
    } else {
        debug!("card {id:?}/{name:?} (num {num}) matches no configured card, ignoring");
    }
}

fn controls_added(model: &mut Model, num: u32) -> Option<crate::model::CardHandle> {
    let found = model.cards().find(|(_, c)| c.num == Some(num)).map(|(h, _)| h);
    if found.is_none() {
        error!("controls-added for unknown card num {num}");
    }
    found
}

#[allow(clippy::too_many_arguments)]
fn element_added(
    model: &mut Model,
    mixer: &dyn MixerIo,
    card_num: u32,
    numid: u32,
    interface: &str,
    name: &str,
    index: i64,
    device: i64,
    subdevice: i64,
) -> Result<(), BindError> {
    let card = match model.cards().find(|(_, c)| c.num == Some(card_num)) {
        Some((h, _)) => h,
        None => return Ok(()),
    };

    if let Some((_, bound)) = model
        .card(card)
        .elements
        .iter()
        .map(|&h| (h, model.element(h)))
        .find(|(_, e)| e.numid == Some(numid))
    {
        let mismatched = !bound.interface.matches(&interface.to_string())
            || !bound.name.matches(&name.to_string())
            || !bound.index.matches(&index)
            || !bound.device.matches(&device)
            || !bound.subdevice.matches(&subdevice);
        if mismatched {
            error!("{}", BindError::ConfusedDuplicateElement { numid });
        }
        return Ok(());
    }

    let target = model.card(card).elements.iter().copied().find(|&h| {
        let e = model.element(h);
        e.numid.is_none()
            && e.interface.matches(&interface.to_string())
            && e.name.matches(&name.to_string())
            && e.index.matches(&index)
            && e.device.matches(&device)
            && e.subdevice.matches(&subdevice)
    });

    let Some(handle) = target else {
        return Ok(());
    };

    let (_kind, descriptor) = match mixer.descriptor(card_num, numid) {
        Ok(pair) => pair,
        Err(err) => {
            let err = BindError::from(err);
            error!("hw:{card_num},{numid}: {err}");
            return Ok(());
        }
    };

    model.element_mut(handle).numid = Some(numid);
    model.element_mut(handle).descriptor = Some(descriptor.clone());

    resolve_chain(model, handle, &descriptor)
}

/// Resolves every SetValue rule in `element`'s reverse-insertion-order
/// chain now that a descriptor is known. Unresolvable rules are logged and
/// left at their zero default rather than aborting the whole bind, since
/// one bad rule line should not prevent every other element from binding.
fn resolve_chain(
    model: &mut Model,
    element: crate::model::ElementHandle,
    descriptor: &Descriptor,
) -> Result<(), BindError> {
    for rule_handle in model.set_value_chain(element) {
        let rule = model.rule(rule_handle);
        let crate::model::RuleAction::SetValue { value_str, .. } = &rule.action else {
            continue;
        };
        match value::resolve(value_str, descriptor) {
            Ok(resolved) => {
                if let crate::model::RuleAction::SetValue { value, .. } =
                    &mut model.rule_mut(rule_handle).action
                {
                    *value = resolved;
                }
            }
            Err(err) => {
                error!("line {}: can't resolve rule value: {err}", rule.line);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixerio::MixerIoError;
    use crate::model::{Pattern, ValueKind};

    struct FakeMixer;
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
        fn set(&self, _card_num: u32, _numid: u32, _value: i64) -> Result<(), MixerIoError> {
            Ok(())
        }
        fn descriptor(&self, _card_num: u32, _numid: u32) -> Result<(ValueKind, Descriptor), MixerIoError> {
            Ok((ValueKind::Int, Descriptor::Int { min: 0, max: 100, step: 1 }))
        }
    }

    fn wildcard_card(model: &mut Model) -> crate::model::CardHandle {
        model.define_card(Pattern::Any, Pattern::from_config_str("*"))
    }

    #[test]
    fn card_binds_to_first_matching_unbound_pattern() {
        let mut model = Model::new();
        let card = model.define_card(Pattern::Any, Pattern::from_config_str("hw0name"));
        card_added(&mut model, 3, "hw0id", "hw0name");
        assert_eq!(model.card(card).num, Some(3));
    }

    #[test]
    fn card_rebinding_same_num_with_same_identity_is_a_silent_no_op() {
        let mut model = Model::new();
        let card = wildcard_card(&mut model);
        model.card_mut(card).num = Some(1);
        card_added(&mut model, 1, "x", "y");
        assert_eq!(model.card(card).num, Some(1));
    }

    #[test]
    fn element_binds_and_resolves_value_chain_once_descriptor_known() {
        let mut model = Model::new();
        let card = wildcard_card(&mut model);
        model.card_mut(card).num = Some(0);
        let elem = model.define_element(
            card,
            Pattern::from_config_str("*"),
            Pattern::from_config_str("Master"),
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
        );
        let entry = model.define_entry("earpiece").unwrap();
        model.define_rule_set_value(entry, crate::model::RuleType::Sink, card, elem, "50%", 1);

        let mixer = FakeMixer;
        element_added(&mut model, &mixer, 0, 7, "Mixer", "Master", 0, 0, 0).unwrap();

        assert_eq!(model.element(elem).numid, Some(7));
        let rule = model.set_value_chain(elem)[0];
        match &model.rule(rule).action {
            crate::model::RuleAction::SetValue { value, .. } => assert_eq!(*value, 50),
            _ => panic!("expected SetValue"),
        }
    }
}
