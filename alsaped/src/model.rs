//! The static object graph defined by configuration: cards, elements,
//! entries, rules. Purely declarative — append-only builders, no execution
//! logic here.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// A matchable field: either a wildcard or an exact value.
///
/// Replaces the `"*"` string / `-1` integer sentinels used throughout the
/// original control definitions with an explicit sum type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pattern<T> {
    Any,
    Exact(T),
}

impl<T> Pattern<T> {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Pattern::Any)
    }
}

impl<T: PartialEq> Pattern<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(want) => want == value,
        }
    }
}

impl Pattern<String> {
    /// Parse the config convention: `"*"` is the wildcard, anything else is exact.
    pub fn from_config_str(s: &str) -> Self {
        if s == "*" {
            Pattern::Any
        } else {
            Pattern::Exact(s.to_string())
        }
    }
}

impl fmt::Display for Pattern<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "*"),
            Pattern::Exact(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("entry {0:?} already defined")]
    AlreadyDefined(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

macro_rules! handle {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(usize);
    };
}
handle!(CardHandle);
handle!(ElementHandle);
handle!(EntryHandle);
handle!(RuleHandle);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleType {
    Sink,
    Source,
    Context,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Enum,
    Bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    Int { min: i64, max: i64, step: i64 },
    Enum { names: Vec<String> },
    Bool,
}

pub struct Card {
    pub id: Pattern<String>,
    pub name: Pattern<String>,
    pub num: Option<u32>,
    pub elements: Vec<ElementHandle>,
    pub defaults: Vec<RuleHandle>,
}

pub struct Element {
    pub card: CardHandle,
    pub interface: Pattern<String>,
    pub name: Pattern<String>,
    pub index: Pattern<i64>,
    pub device: Pattern<i64>,
    pub subdevice: Pattern<i64>,
    pub numid: Option<u32>,
    pub descriptor: Option<Descriptor>,
    /// Head of the reverse-insertion-order chain of SetValue rules that
    /// target this element, used only by the Binder's value resolution pass.
    pub most_recent_rule: Option<RuleHandle>,
}

pub struct Entry {
    pub name: String,
    pub sink: Vec<RuleHandle>,
    pub source: Vec<RuleHandle>,
    pub context: Vec<RuleHandle>,
}

impl Entry {
    pub fn rules(&self, rule_type: RuleType) -> &[RuleHandle] {
        match rule_type {
            RuleType::Sink => &self.sink,
            RuleType::Source => &self.source,
            RuleType::Context => &self.context,
        }
    }

    fn rules_mut(&mut self, rule_type: RuleType) -> &mut Vec<RuleHandle> {
        match rule_type {
            RuleType::Sink => &mut self.sink,
            RuleType::Source => &mut self.source,
            RuleType::Context => &mut self.context,
        }
    }
}

/// One step of a rule sequence. A closed sum type in place of the tagged
/// union `struct rule_def` the original carried.
pub enum RuleAction {
    SetValue {
        card: CardHandle,
        element: ElementHandle,
        /// The element's previous SetValue rule at the time this one was
        /// appended (reverse-insertion-order chain, walked once at bind time).
        elem_rule: Option<RuleHandle>,
        value_str: String,
        /// Resolved value; 0 until the Binder resolves it successfully.
        value: i64,
    },
    OutbandExecute {
        delay_ms: i32,
    },
    OutbandCancel,
    Suspend {
        micros: u32,
    },
}

pub struct Rule {
    pub line: u32,
    pub action: RuleAction,
}

#[derive(Default)]
pub struct Model {
    cards: Vec<Card>,
    elements: Vec<Element>,
    entries: Vec<Entry>,
    rules: Vec<Rule>,
    entry_names: HashMap<String, EntryHandle>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_card(&mut self, id: Pattern<String>, name: Pattern<String>) -> CardHandle {
        self.cards.push(Card {
            id,
            name,
            num: None,
            elements: Vec::new(),
            defaults: Vec::new(),
        });
        CardHandle(self.cards.len() - 1)
    }

    pub fn define_element(
        &mut self,
        card: CardHandle,
        interface: Pattern<String>,
        name: Pattern<String>,
        index: Pattern<i64>,
        device: Pattern<i64>,
        subdevice: Pattern<i64>,
    ) -> ElementHandle {
        self.elements.push(Element {
            card,
            interface,
            name,
            index,
            device,
            subdevice,
            numid: None,
            descriptor: None,
            most_recent_rule: None,
        });
        let handle = ElementHandle(self.elements.len() - 1);
        self.cards[card.0].elements.push(handle);
        handle
    }

    pub fn define_entry(&mut self, name: impl Into<String>) -> Result<EntryHandle, ModelError> {
        let name = name.into();
        if self.entry_names.contains_key(&name) {
            return Err(ModelError::AlreadyDefined(name));
        }
        self.entries.push(Entry {
            name: name.clone(),
            sink: Vec::new(),
            source: Vec::new(),
            context: Vec::new(),
        });
        let handle = EntryHandle(self.entries.len() - 1);
        self.entry_names.insert(name, handle);
        Ok(handle)
    }

    pub fn entry_by_name(&self, name: &str) -> Option<EntryHandle> {
        self.entry_names.get(name).copied()
    }

    fn push_rule(&mut self, line: u32, action: RuleAction) -> RuleHandle {
        self.rules.push(Rule { line, action });
        RuleHandle(self.rules.len() - 1)
    }

    pub fn define_rule_set_value(
        &mut self,
        entry: EntryHandle,
        rule_type: RuleType,
        card: CardHandle,
        element: ElementHandle,
        value_str: impl Into<String>,
        line: u32,
    ) -> RuleHandle {
        let elem_rule = self.elements[element.0].most_recent_rule;
        let handle = self.push_rule(
            line,
            RuleAction::SetValue {
                card,
                element,
                elem_rule,
                value_str: value_str.into(),
                value: 0,
            },
        );
        self.elements[element.0].most_recent_rule = Some(handle);
        self.entries[entry.0].rules_mut(rule_type).push(handle);
        handle
    }

    pub fn define_rule_outband(
        &mut self,
        entry: EntryHandle,
        rule_type: RuleType,
        delay_ms: i32,
        line: u32,
    ) -> Result<RuleHandle, ModelError> {
        if !(-1..=3000).contains(&delay_ms) {
            return Err(ModelError::InvalidArgument(
                "outband delay must be in [-1, 3000] ms",
            ));
        }
        let action = if delay_ms == -1 {
            RuleAction::OutbandCancel
        } else {
            RuleAction::OutbandExecute { delay_ms }
        };
        let handle = self.push_rule(line, action);
        self.entries[entry.0].rules_mut(rule_type).push(handle);
        Ok(handle)
    }

    pub fn define_rule_suspend(
        &mut self,
        entry: EntryHandle,
        rule_type: RuleType,
        delay_ms: i32,
        line: u32,
    ) -> Result<RuleHandle, ModelError> {
        if !(0..=500).contains(&delay_ms) {
            return Err(ModelError::InvalidArgument(
                "suspend delay must be in [0, 500] ms",
            ));
        }
        let handle = self.push_rule(
            line,
            RuleAction::Suspend {
                micros: delay_ms as u32 * 1000,
            },
        );
        self.entries[entry.0].rules_mut(rule_type).push(handle);
        Ok(handle)
    }

    /// `[default]` rules are SetValue-only (see `original_source/src/config.c`
    /// `ruldef_parse_deflt`/`create_deflt`: no `entry=` key, no outband or
    /// suspend shape), appended to the owning card's default sequence.
    pub fn define_default(
        &mut self,
        card: CardHandle,
        element: ElementHandle,
        value_str: impl Into<String>,
        line: u32,
    ) -> RuleHandle {
        let elem_rule = self.elements[element.0].most_recent_rule;
        let handle = self.push_rule(
            line,
            RuleAction::SetValue {
                card,
                element,
                elem_rule,
                value_str: value_str.into(),
                value: 0,
            },
        );
        self.elements[element.0].most_recent_rule = Some(handle);
        self.cards[card.0].defaults.push(handle);
        handle
    }

    pub fn card(&self, handle: CardHandle) -> &Card {
        &self.cards[handle.0]
    }

    pub fn card_mut(&mut self, handle: CardHandle) -> &mut Card {
        &mut self.cards[handle.0]
    }

    pub fn cards(&self) -> impl Iterator<Item = (CardHandle, &Card)> {
        self.cards.iter().enumerate().map(|(i, c)| (CardHandle(i), c))
    }

    pub fn element(&self, handle: ElementHandle) -> &Element {
        &self.elements[handle.0]
    }

    pub fn element_mut(&mut self, handle: ElementHandle) -> &mut Element {
        &mut self.elements[handle.0]
    }

    pub fn entry(&self, handle: EntryHandle) -> &Entry {
        &self.entries[handle.0]
    }

    pub fn rule(&self, handle: RuleHandle) -> &Rule {
        &self.rules[handle.0]
    }

    pub fn rule_mut(&mut self, handle: RuleHandle) -> &mut Rule {
        &mut self.rules[handle.0]
    }

    /// Walk the reverse-insertion-order chain of SetValue rules targeting
    /// `element`, oldest last. Used only by the Binder's value resolution pass.
    pub fn set_value_chain(&self, element: ElementHandle) -> Vec<RuleHandle> {
        let mut chain = Vec::new();
        let mut cursor = self.elements[element.0].most_recent_rule;
        while let Some(handle) = cursor {
            chain.push(handle);
            cursor = match &self.rules[handle.0].action {
                RuleAction::SetValue { elem_rule, .. } => *elem_rule,
                _ => None,
            };
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entry_name_is_rejected() {
        let mut model = Model::new();
        model.define_entry("earpiece").unwrap();
        assert!(matches!(
            model.define_entry("earpiece"),
            Err(ModelError::AlreadyDefined(_))
        ));
    }

    #[test]
    fn outband_delay_bounds_are_enforced() {
        let mut model = Model::new();
        let entry = model.define_entry("earpiece").unwrap();
        assert!(model
            .define_rule_outband(entry, RuleType::Sink, 3001, 1)
            .is_err());
        assert!(model
            .define_rule_outband(entry, RuleType::Sink, -2, 1)
            .is_err());
        assert!(model
            .define_rule_outband(entry, RuleType::Sink, 3000, 1)
            .is_ok());
    }

    #[test]
    fn suspend_delay_bounds_are_enforced() {
        let mut model = Model::new();
        let entry = model.define_entry("earpiece").unwrap();
        assert!(model
            .define_rule_suspend(entry, RuleType::Sink, 501, 1)
            .is_err());
        assert!(model
            .define_rule_suspend(entry, RuleType::Sink, -1, 1)
            .is_err());
        let handle = model
            .define_rule_suspend(entry, RuleType::Sink, 500, 1)
            .unwrap();
        match model.rule(handle).action {
            RuleAction::Suspend { micros } => assert_eq!(micros, 500_000),
            _ => panic!("expected suspend rule"),
        }
    }

    #[test]
    fn set_value_chain_links_rules_reverse_insertion_order() {
        let mut model = Model::new();
        let card = model.define_card(Pattern::Any, Pattern::Any);
        let element = model.define_element(
            card,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
            Pattern::Any,
        );
        let entry = model.define_entry("earpiece").unwrap();
        let first = model.define_rule_set_value(entry, RuleType::Sink, card, element, "10%", 1);
        let second = model.define_rule_set_value(entry, RuleType::Sink, card, element, "50%", 2);
        let chain = model.set_value_chain(element);
        assert_eq!(chain, vec![second, first]);
    }

    #[test]
    fn outband_delay_minus_one_is_cancellation() {
        let mut model = Model::new();
        let entry = model.define_entry("earpiece").unwrap();
        let handle = model
            .define_rule_outband(entry, RuleType::Sink, -1, 1)
            .unwrap();
        assert!(matches!(model.rule(handle).action, RuleAction::OutbandCancel));
    }
}
