//! Match rules: declarative filters over incoming messages.
//!
//! Grounded on adbus's `struct adbus_Match` (`include/c/adbus/adbus.h`):
//! a flat set of optional exact-match fields plus up to a handful of
//! positional argument constraints, evaluated conjunctively.

use crate::message::{Message, MessageKind};
use crate::object_path::ObjectPathBuf;

/// The message type a [`MatchRule`] restricts to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

impl MatchType {
    fn matches(self, kind: &MessageKind) -> bool {
        matches!(
            (self, kind),
            (MatchType::MethodCall, MessageKind::MethodCall { .. })
                | (MatchType::MethodReturn, MessageKind::MethodReturn { .. })
                | (MatchType::Error, MessageKind::Error { .. })
                | (MatchType::Signal, MessageKind::Signal { .. })
        )
    }
}

/// A single argument-equality constraint: the N-th body argument, as a
/// string, must equal `value`.
#[derive(Debug, Clone)]
pub struct ArgMatch {
    pub index: u8,
    pub value: Box<str>,
    /// If true, match by path-namespace prefix rather than exact equality
    /// (used for `arg0namespace`).
    pub namespace: bool,
}

/// A filter over incoming messages, plus whether it should be removed
/// after it fires once.
#[derive(Debug, Clone, Default)]
pub struct MatchRule {
    pub message_type: Option<MatchType>,
    pub sender: Option<Box<str>>,
    pub destination: Option<Box<str>>,
    pub path: Option<ObjectPathBuf>,
    pub path_namespace: Option<ObjectPathBuf>,
    pub interface: Option<Box<str>>,
    pub member: Option<Box<str>>,
    pub error_name: Option<Box<str>>,
    pub reply_serial: Option<u32>,
    pub args: Vec<ArgMatch>,
    pub remove_on_first_match: bool,
    /// Whether `add_match` should forward this rule to the bus daemon via
    /// `org.freedesktop.DBus.AddMatch`.
    pub add_match_to_bus: bool,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, ty: MatchType) -> Self {
        self.message_type = Some(ty);
        self
    }

    pub fn with_interface(mut self, interface: impl Into<Box<str>>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_member(mut self, member: impl Into<Box<str>>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn with_path(mut self, path: ObjectPathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_path_namespace(mut self, path: ObjectPathBuf) -> Self {
        self.path_namespace = Some(path);
        self
    }

    pub fn with_sender(mut self, sender: impl Into<Box<str>>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Evaluate this rule against `message`; `sender` is the message's
    /// actual sender as seen by the router (messages don't always carry
    /// their own sender header on peer-to-peer links).
    pub fn matches(&self, message: &Message, sender: Option<&str>) -> bool {
        if let Some(ty) = self.message_type {
            if !ty.matches(&message.kind) {
                return false;
            }
        }

        if let Some(expected) = &self.sender {
            if sender != Some(expected.as_ref()) {
                return false;
            }
        }

        if let Some(expected) = &self.destination {
            if message.destination.as_deref() != Some(expected.as_ref()) {
                return false;
            }
        }

        let (path, interface, member) = match &message.kind {
            MessageKind::MethodCall { path, interface, member } => {
                (Some(path), interface.as_deref(), Some(member.as_ref()))
            }
            MessageKind::Signal { path, interface, member } => {
                (Some(path), Some(interface.as_ref()), Some(member.as_ref()))
            }
            MessageKind::MethodReturn { .. } | MessageKind::Error { .. } => (None, None, None),
        };

        if let Some(expected) = &self.path {
            if path.map(|p| p.as_object_path()) != Some(expected.as_object_path()) {
                return false;
            }
        }

        if let Some(namespace) = &self.path_namespace {
            match path {
                Some(p) if p.starts_with(namespace) => {}
                _ => return false,
            }
        }

        if let Some(expected) = &self.interface {
            if interface != Some(expected.as_ref()) {
                return false;
            }
        }

        if let Some(expected) = &self.member {
            if member != Some(expected.as_ref()) {
                return false;
            }
        }

        if let Some(expected) = &self.error_name {
            match &message.kind {
                MessageKind::Error { error_name, .. } if error_name.as_ref() == expected.as_ref() => {}
                _ => return false,
            }
        }

        if let Some(expected) = &self.reply_serial {
            match &message.kind {
                MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. }
                    if reply_serial.get() == *expected => {}
                _ => return false,
            }
        }

        for arg in &self.args {
            let Some(value) = message.body.get(arg.index as usize).and_then(|v| v.as_str()) else {
                return false;
            };
            if arg.namespace {
                if !(value == arg.value.as_ref() || value.starts_with(&format!("{}/", arg.value))) {
                    return false;
                }
            } else if value != arg.value.as_ref() {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_path::ObjectPath;
    use crate::variant::Variant;

    #[test]
    fn matches_signal_by_interface_and_member() {
        let msg = Message::signal(ObjectPath::new(b"/a/b").unwrap(), "com.x.I", "Tick");
        let rule = MatchRule::new()
            .with_type(MatchType::Signal)
            .with_interface("com.x.I")
            .with_member("Tick");
        assert!(rule.matches(&msg, None));

        let rule_wrong = MatchRule::new().with_member("Tock");
        assert!(!rule_wrong.matches(&msg, None));
    }

    #[test]
    fn path_namespace_matches_descendants() {
        let msg = Message::signal(ObjectPath::new(b"/a/b/c").unwrap(), "com.x.I", "Tick");
        let rule = MatchRule::new().with_path_namespace(ObjectPath::new(b"/a/b").unwrap().to_owned());
        assert!(rule.matches(&msg, None));
    }

    #[test]
    fn arg_match() {
        let msg = Message::signal(ObjectPath::new(b"/").unwrap(), "com.x.I", "Tick")
            .with_body(vec![Variant::String("hello".into())]);
        let rule = MatchRule {
            args: vec![ArgMatch {
                index: 0,
                value: "hello".into(),
                namespace: false,
            }],
            ..MatchRule::new()
        };
        assert!(rule.matches(&msg, None));
        let rule_wrong = MatchRule {
            args: vec![ArgMatch {
                index: 0,
                value: "bye".into(),
                namespace: false,
            }],
            ..MatchRule::new()
        };
        assert!(!rule_wrong.matches(&msg, None));
    }
}
