//! The D-Bus link to the policy decision point. Wire contract grounded in
//! `original_source/src/dbusif.c`: a well-known name is watched for via
//! `NameOwnerChanged`, a `register` method call announces this enforcement
//! point, and inbound `audio_actions` signals decode into [`Action`]s with
//! a `status(txid, ok)` reply sent back unless `txid == 0`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{error, info};

use crate::error::TransportError;

const POLICY_DBUS_INTERFACE: &str = "com.nokia.policy";
const POLICY_DBUS_MYPATH: &str = "/com/nokia/policy/enforce/alsa";
const POLICY_DBUS_MYNAME: &str = "com.nokia.policy.alsa";
const POLICY_DBUS_PDPATH: &str = "/com/nokia/policy";
const POLICY_DBUS_PDNAME: &str = "org.freedesktop.ohm";
const POLICY_ACTIONS: &str = "audio_actions";
const POLICY_STATUS: &str = "status";

/// A decoded `audio_actions` member, already split out of the nested
/// dict-of-struct-array wire shape `dbusif.c` sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    RouteSink { device: String },
    RouteSource { device: String },
    ContextSet { variable: String, value: String },
}

/// Spec §6's `PolicyBus` external interface.
pub trait PolicyBus {
    fn connect(&mut self) -> Result<(), TransportError>;
    /// Non-blocking poll for one batch of `(txid, actions)` pairs.
    fn poll_actions(&mut self) -> Result<Vec<(u32, Vec<Action>)>, TransportError>;
    /// Skipped entirely when `txid == 0`, matching `signal_status`.
    fn send_status(&mut self, txid: u32, ok: bool) -> Result<(), TransportError>;
}

/// One pending `(txid, actions)` batch, decoded off the bus thread and
/// handed to `poll_actions` on the next cooperative loop tick.
type ActionQueue = Arc<Mutex<VecDeque<(u32, Vec<Action>)>>>;

/// One `audio_actions` dict entry as it comes off the wire: the action
/// group's D-Bus interface name (`com.nokia.policy.audio_route` or
/// `com.nokia.policy.context`) paired with its flattened `argname -> value`
/// fields, matching `dbusif.c`'s `action_parser`/`argdsc` table walk.
type RawActionGroup = (String, Vec<(String, String)>);

pub struct DbusPolicyBus {
    conn: dbus::blocking::Connection,
    registered: bool,
    queue: ActionQueue,
}

impl DbusPolicyBus {
    pub fn new() -> Result<Self, TransportError> {
        let conn = dbus::blocking::Connection::new_system()
            .map_err(|e| TransportError::Bus(e.to_string()))?;
        Ok(Self {
            conn,
            registered: false,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    fn register_to_pdp(&mut self) -> Result<(), TransportError> {
        info!(
            "registering to policy daemon: name='{POLICY_DBUS_MYNAME}' path='{POLICY_DBUS_MYPATH}' if='{POLICY_DBUS_INTERFACE}'"
        );
        let msg = dbus::Message::new_method_call(
            POLICY_DBUS_PDNAME,
            POLICY_DBUS_PDPATH,
            POLICY_DBUS_INTERFACE,
            "register",
        )
        .map_err(|e| TransportError::Bus(e.to_string()))?
        .append3(POLICY_DBUS_MYNAME, POLICY_DBUS_MYPATH, POLICY_ACTIONS);

        self.conn
            .channel()
            .send(msg)
            .map_err(|_| TransportError::Bus("failed to register to policy daemon".into()))?;
        self.registered = true;
        Ok(())
    }
}

impl PolicyBus for DbusPolicyBus {
    fn connect(&mut self) -> Result<(), TransportError> {
        use dbus::channel::MatchingReceiver;
        use dbus::message::MatchRule;

        let name_owner_rule = MatchRule::new_signal("org.freedesktop.DBus", "NameOwnerChanged");
        self.conn
            .add_match(name_owner_rule, |_: (), _, _| true)
            .map_err(|e| TransportError::Bus(e.to_string()))?;

        let actions_rule = MatchRule::new_signal(POLICY_DBUS_INTERFACE, POLICY_ACTIONS);
        let queue = Arc::clone(&self.queue);
        self.conn
            .add_match(
                actions_rule,
                move |(txid, groups): (u32, Vec<RawActionGroup>), _, _| {
                    info!("got actions (txid:{txid})");
                    let actions = groups
                        .into_iter()
                        .filter_map(|(actname, fields)| match decode_action(&actname, &fields) {
                            Ok(action) => Some(action),
                            Err(()) => None,
                        })
                        .collect();
                    queue.lock().unwrap().push_back((txid, actions));
                    true
                },
            )
            .map_err(|e| TransportError::Bus(e.to_string()))?;

        self.register_to_pdp()
    }

    fn poll_actions(&mut self) -> Result<Vec<(u32, Vec<Action>)>, TransportError> {
        self.conn
            .process(std::time::Duration::from_millis(0))
            .map_err(|e| TransportError::Bus(e.to_string()))?;
        Ok(self.queue.lock().unwrap().drain(..).collect())
    }

    fn send_status(&mut self, txid: u32, ok: bool) -> Result<(), TransportError> {
        if txid == 0 {
            info!("not sending status message since transaction ID is 0");
            return Ok(());
        }
        info!(
            "sending D-Bus signal to: path='{POLICY_DBUS_MYPATH}', if='{POLICY_DBUS_INTERFACE}' member='{POLICY_STATUS}' content: txid={txid} status={ok}"
        );
        let msg = dbus::Message::new_signal(POLICY_DBUS_MYPATH, POLICY_DBUS_INTERFACE, POLICY_STATUS)
            .map_err(|e| TransportError::Bus(e.to_string()))?
            .append2(txid, ok as u32);
        self.conn
            .channel()
            .send(msg)
            .map_err(|_| TransportError::Bus("can't send status message: out of memory".into()))?;
        Ok(())
    }
}

/// Decodes one `audio_actions` dict entry keyed by the D-Bus interface name
/// carried in the wire message (`com.nokia.policy.audio_route` or
/// `com.nokia.policy.context`) into this crate's flat [`Action`].
///
/// `args` is the flattened `(key, value)` pairs the nested
/// struct<string,variant> array decodes to for one action entry, matching
/// `action_parser`'s `argdsc` table lookup.
pub fn decode_action(actname: &str, args: &[(String, String)]) -> Result<Action, ()> {
    let get = |key: &str| args.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

    match actname {
        "com.nokia.policy.audio_route" => {
            let kind = get("type").ok_or(())?;
            let device = get("device").ok_or(())?;
            match kind.as_str() {
                "sink" => Ok(Action::RouteSink { device }),
                "source" => Ok(Action::RouteSource { device }),
                other => {
                    error!("invalid audio route type {other:?}");
                    Err(())
                }
            }
        }
        "com.nokia.policy.context" => {
            let variable = get("variable").ok_or(())?;
            let value = get("value").ok_or(())?;
            Ok(Action::ContextSet { variable, value })
        }
        other => {
            error!("unknown action descriptor {other:?}, ignoring");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sink_route() {
        let args = vec![
            ("type".to_string(), "sink".to_string()),
            ("device".to_string(), "ihf".to_string()),
        ];
        assert_eq!(
            decode_action("com.nokia.policy.audio_route", &args).unwrap(),
            Action::RouteSink {
                device: "ihf".to_string()
            }
        );
    }

    #[test]
    fn decodes_context() {
        let args = vec![
            ("variable".to_string(), "profile".to_string()),
            ("value".to_string(), "silent".to_string()),
        ];
        assert_eq!(
            decode_action("com.nokia.policy.context", &args).unwrap(),
            Action::ContextSet {
                variable: "profile".to_string(),
                value: "silent".to_string()
            }
        );
    }

    #[test]
    fn unknown_descriptor_is_rejected() {
        assert!(decode_action("com.nokia.policy.nonsense", &[]).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let args = vec![("type".to_string(), "sink".to_string())];
        assert!(decode_action("com.nokia.policy.audio_route", &args).is_err());
    }
}
