//! The INI-like config grammar from spec.md §6, detailed against
//! `original_source/src/config.c` in `SPEC_FULL.md` §4.6: `[control]`
//! blocks are flushed into `Model::define_card`/`define_element` at the
//! *next* section header or EOF; route/context/default lines are each
//! applied immediately as they're read.
//!
//! Like the original (`config_parse`'s `status = -1; ...; continue`), a
//! bad line is logged and parsing continues to the end of the file so a
//! single config author sees every mistake at once; the first error is
//! still what's returned, since config errors are fatal at startup either
//! way.

use std::collections::HashMap;

use log::error;

use crate::error::{ConfigError, ConfigErrorKind};
use crate::model::{CardHandle, ElementHandle, Model, Pattern, RuleType};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Control,
    Sink,
    Source,
    Context,
    Default,
}

#[derive(Default)]
struct PendingElem {
    id: Option<String>,
    card: Option<String>,
    iface: Option<String>,
    name: Option<String>,
    index: Option<i64>,
    device: Option<i64>,
    subdevice: Option<i64>,
}

pub struct Loader {
    model: Model,
    section: Section,
    pending: PendingElem,
    cards_by_name: HashMap<String, CardHandle>,
    elems_by_id: HashMap<String, (CardHandle, ElementHandle)>,
    first_err: Option<ConfigError>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            model: Model::new(),
            section: Section::None,
            pending: PendingElem::default(),
            cards_by_name: HashMap::new(),
            elems_by_id: HashMap::new(),
            first_err: None,
        }
    }

    /// Parses the full contents of one (or, for a config directory, one
    /// concatenated) config text into a [`Model`]. Concatenation across
    /// multiple files is the caller's job (CLI `-c` accepts a directory,
    /// mirroring `pcid-spawner`'s handling; see `main.rs`).
    pub fn load(mut self, text: &str) -> Result<Model, ConfigError> {
        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = (idx + 1) as u32;
            let line = match preprocess(raw_line) {
                Ok(line) => line,
                Err(c) => {
                    self.fail(lineno, ConfigErrorKind::ControlChar(c));
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                self.close_section(lineno);
                match rest.strip_suffix(']') {
                    Some("control") => self.section = Section::Control,
                    Some("sink-route") => self.section = Section::Sink,
                    Some("source-route") => self.section = Section::Source,
                    Some("context") => self.section = Section::Context,
                    Some("default") => self.section = Section::Default,
                    _ => {
                        self.section = Section::None;
                        self.fail(lineno, ConfigErrorKind::UnknownSection(line.clone()));
                    }
                }
                continue;
            }

            match self.section {
                Section::Control => self.parse_control_line(lineno, &line),
                Section::Sink => self.parse_route_line(lineno, &line, RuleType::Sink),
                Section::Source => self.parse_route_line(lineno, &line, RuleType::Source),
                Section::Context => self.parse_route_line(lineno, &line, RuleType::Context),
                Section::Default => self.parse_default_line(lineno, &line),
                Section::None => self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.clone())),
            }
        }
        self.close_section((text.lines().count() + 1) as u32);

        match self.first_err.take() {
            Some(err) => Err(err),
            None => Ok(self.model),
        }
    }

    fn fail(&mut self, lineno: u32, kind: ConfigErrorKind) {
        let err = ConfigError::At { line: lineno, kind };
        error!("{err}");
        if self.first_err.is_none() {
            self.first_err = Some(err);
        }
    }

    fn close_section(&mut self, lineno: u32) {
        if self.section == Section::Control {
            self.flush_elem(lineno);
        }
        self.section = Section::None;
    }

    fn flush_elem(&mut self, lineno: u32) {
        let pending = std::mem::take(&mut self.pending);
        let Some(id) = pending.id else {
            return;
        };
        let card_name = pending.card.unwrap_or_else(|| "*".to_string());
        let card = *self
            .cards_by_name
            .entry(card_name.clone())
            .or_insert_with(|| {
                self.model
                    .define_card(Pattern::Any, Pattern::from_config_str(&card_name))
            });
        let iface = Pattern::from_config_str(&pending.iface.unwrap_or_else(|| "*".to_string()));
        let name = Pattern::from_config_str(&pending.name.unwrap_or_else(|| "*".to_string()));
        let index = pattern_from_opt(pending.index);
        let device = pattern_from_opt(pending.device);
        let subdevice = pattern_from_opt(pending.subdevice);
        let elem = self
            .model
            .define_element(card, iface, name, index, device, subdevice);
        if self.elems_by_id.insert(id.clone(), (card, elem)).is_some() {
            self.fail(lineno, ConfigErrorKind::InvalidDefinition(format!("redefinition of control '{id}'")));
        }
    }

    fn parse_control_line(&mut self, lineno: u32, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.to_string()));
            return;
        };
        match key {
            "id" => self.pending.id = Some(value.to_string()),
            "card" => self.pending.card = Some(value.to_string()),
            "interface" => self.pending.iface = Some(value.to_string()),
            "name" => self.pending.name = Some(value.to_string()),
            "index" => self.pending.index = self.parse_num(lineno, value),
            "device" => self.pending.device = self.parse_num(lineno, value),
            "sub-device" => self.pending.subdevice = self.parse_num(lineno, value),
            _ => self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.to_string())),
        }
    }

    fn parse_num(&mut self, lineno: u32, text: &str) -> Option<i64> {
        match text.parse::<u32>() {
            Ok(n) => Some(n as i64),
            Err(_) => {
                self.fail(lineno, ConfigErrorKind::InvalidNumber(text.to_string()));
                None
            }
        }
    }

    fn parse_route_line(&mut self, lineno: u32, line: &str, rule_type: RuleType) {
        let Some((entry_name, rest)) = line.split_once('=') else {
            self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.to_string()));
            return;
        };
        if !valid_entry(entry_name) {
            self.fail(lineno, ConfigErrorKind::InvalidEntryId(entry_name.to_string()));
            return;
        }
        let entry = self.entry(entry_name);

        if let Some(delay_str) = rest.strip_prefix("@outband_execution@delay:") {
            let Some(delay) = self.parse_num(lineno, delay_str) else {
                return;
            };
            if let Err(err) = self.model.define_rule_outband(entry, rule_type, delay as i32, lineno) {
                self.fail(lineno, ConfigErrorKind::InvalidDefinition(err.to_string()));
            }
            return;
        }
        if rest == "@outband_cancellation@" {
            if let Err(err) = self.model.define_rule_outband(entry, rule_type, -1, lineno) {
                self.fail(lineno, ConfigErrorKind::InvalidDefinition(err.to_string()));
            }
            return;
        }
        if let Some(sleep_str) = rest.strip_prefix("@suspend_execution@sleep:") {
            let Some(sleep) = self.parse_num(lineno, sleep_str) else {
                return;
            };
            if let Err(err) = self.model.define_rule_suspend(entry, rule_type, sleep as i32, lineno) {
                self.fail(lineno, ConfigErrorKind::InvalidDefinition(err.to_string()));
            }
            return;
        }

        let Some((elemid, value)) = rest.split_once(':') else {
            self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.to_string()));
            return;
        };
        let Some(&(card, element)) = self.elems_by_id.get(elemid) else {
            self.fail(lineno, ConfigErrorKind::UnknownControlId(elemid.to_string()));
            return;
        };
        self.model
            .define_rule_set_value(entry, rule_type, card, element, value, lineno);
    }

    fn parse_default_line(&mut self, lineno: u32, line: &str) {
        let Some((elemid, value)) = line.split_once(':') else {
            self.fail(lineno, ConfigErrorKind::InvalidDefinition(line.to_string()));
            return;
        };
        let Some(&(card, element)) = self.elems_by_id.get(elemid) else {
            self.fail(lineno, ConfigErrorKind::UnknownControlId(elemid.to_string()));
            return;
        };
        self.model.define_default(card, element, value, lineno);
    }

    fn entry(&mut self, name: &str) -> crate::model::EntryHandle {
        if let Some(handle) = self.model.entry_by_name(name) {
            return handle;
        }
        self.model
            .define_entry(name)
            .expect("just checked entry_by_name above")
    }
}

fn pattern_from_opt(value: Option<i64>) -> Pattern<i64> {
    match value {
        Some(v) => Pattern::Exact(v),
        None => Pattern::Any,
    }
}

/// `entry` must match `[A-Za-z][A-Za-z0-9_-]*` (spec.md §6).
fn valid_entry(entry: &str) -> bool {
    let mut chars = entry.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Strips blanks outside quotes, drops `#`-comments outside quotes, and
/// rejects control characters below 0x20, mirroring `preprocess_buffer`.
/// Quote characters themselves are dropped from the output; whitespace
/// between them survives.
fn preprocess(line: &str) -> Result<String, u8> {
    let mut out = String::with_capacity(line.len());
    let mut quoted = false;
    for c in line.chars() {
        if !quoted && c.is_ascii_whitespace() {
            continue;
        }
        if !quoted && c == '#' {
            break;
        }
        if c == '"' {
            quoted = !quoted;
            continue;
        }
        if (c as u32) < 0x20 {
            return Err(c as u8);
        }
        out.push(c);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_one_resolves_percent_value_at_bind_time_not_parse_time() {
        let config = r#"
[control]
id=e
card=*
interface=MIXER
name=Master
index=0
device=0
sub-device=0
[sink-route]
earpiece=e:50%
"#;
        let model = Loader::new().load(config).unwrap();
        let entry = model.entry_by_name("earpiece").unwrap();
        assert_eq!(model.entry(entry).rules(RuleType::Sink).len(), 1);
    }

    #[test]
    fn outband_execute_and_plain_setting_share_one_entry() {
        let config = r#"
[control]
id=e
card=*
interface=MIXER
name=Master
index=0
device=0
sub-device=0
[sink-route]
earpiece=@outband_execution@delay:200
earpiece=e:75%
"#;
        let model = Loader::new().load(config).unwrap();
        let entry = model.entry_by_name("earpiece").unwrap();
        assert_eq!(model.entry(entry).rules(RuleType::Sink).len(), 2);
    }

    #[test]
    fn outband_cancellation_and_ihf_entry() {
        let config = r#"
[control]
id=e
card=*
interface=MIXER
name=Master
index=0
device=0
sub-device=0
[sink-route]
earpiece=@outband_cancellation@
ihf=e:0%
"#;
        let model = Loader::new().load(config).unwrap();
        let earpiece = model.entry_by_name("earpiece").unwrap();
        let ihf = model.entry_by_name("ihf").unwrap();
        assert_eq!(model.entry(earpiece).rules(RuleType::Sink).len(), 1);
        assert_eq!(model.entry(ihf).rules(RuleType::Sink).len(), 1);
    }

    #[test]
    fn default_section_has_no_entry_key_and_is_set_value_only() {
        let config = r#"
[control]
id=sw
card=*
interface=MIXER
name=Switch
index=0
device=0
sub-device=0
[default]
sw:Off
"#;
        let model = Loader::new().load(config).unwrap();
        let (card, _) = model.cards().next().unwrap();
        assert_eq!(model.card(card).defaults.len(), 1);
    }

    #[test]
    fn comments_and_quoted_whitespace_are_handled() {
        let config = "[control]\nid=\"has space\"\ncard=* # trailing comment\nname=Master\n[sink-route]\n";
        let model = Loader::new().load(config).unwrap();
        assert!(model.entry_by_name("earpiece").is_none());
        let _ = model;
    }

    #[test]
    fn unknown_section_is_a_config_error() {
        let config = "[bogus]\nfoo=bar\n";
        assert!(Loader::new().load(config).is_err());
    }

    #[test]
    fn invalid_entry_id_is_rejected() {
        let config = "[sink-route]\n9bad=e:10\n";
        assert!(Loader::new().load(config).is_err());
    }
}
