//! The sans-IO connection dispatch engine.
//!
//! Owns serials, reply bookkeeping, match rules and bound interfaces,
//! and drives them purely from `parse`/`send` calls: this crate's core
//! has no scheduler of its own (see module docs at the crate root).

mod builder;
mod dispatch;

pub use self::builder::ConnectionBuilder;

use std::collections::HashMap;

use crate::error::{DBusError, Error, ErrorKind, Result};
use crate::interface::InterfaceHandle;
use crate::marshal::Endianness;
use crate::match_rule::MatchRule;
use crate::message::{Frame, Message, MessageKind, Serial};
use crate::object_path::ObjectPathBuf;

/// An opaque identifier for a registered match rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchId(u64);

/// An opaque identifier for a pending reply registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyId(u64);

/// What a fired [`MatchCallback`] tells the dispatcher to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFlow {
    /// Keep walking the remaining match rules for this message.
    Continue,
    /// End the walk; no match rule after this one sees this message.
    Stop,
}

/// Called when a match rule fires. Arguments: the message, and the
/// message's sender (if known). The return value controls whether later
/// rules still get a look at this same message.
#[cfg(not(feature = "cross-thread-proxy"))]
pub type MatchCallback = Box<dyn FnMut(&Message, Option<&str>) -> MatchFlow>;
#[cfg(feature = "cross-thread-proxy")]
pub type MatchCallback = Box<dyn FnMut(&Message, Option<&str>) -> MatchFlow + Send>;

/// Called when a reply (method return or error) arrives for a pending
/// call, or when the registration is torn down without ever firing.
pub enum ReplyOutcome<'a> {
    Success(&'a Message),
    Error(&'a DBusError),
    Cancelled,
}

#[cfg(not(feature = "cross-thread-proxy"))]
pub type ReplyCallback = Box<dyn FnOnce(ReplyOutcome<'_>)>;
#[cfg(feature = "cross-thread-proxy")]
pub type ReplyCallback = Box<dyn FnOnce(ReplyOutcome<'_>) + Send>;

/// A single proxied invocation, already bound to its callback and
/// arguments; running it is the entire side effect.
#[cfg(feature = "cross-thread-proxy")]
pub type ProxiedCall = Box<dyn FnOnce() + Send>;

/// A hook a host installs when it wants match-callback and reply-callback
/// invocations routed through its own executor instead of run inline
/// during [`Connection::parse`]. The hook must run `call` before
/// returning: `parse` is synchronous end to end (see the crate's
/// concurrency notes), so a hook that defers `call` to later would let
/// `parse` return before dispatch for that message actually completed.
#[cfg(feature = "cross-thread-proxy")]
pub type MessageProxyFn = Box<dyn Fn(ProxiedCall) + Send + Sync>;

/// Same contract as [`MessageProxyFn`], but for reply callbacks specifically.
/// Hosts that want match callbacks and reply callbacks proxied onto
/// different executors set this separately from `message_proxy`; hosts
/// that don't care can set both to the same closure.
#[cfg(feature = "cross-thread-proxy")]
pub type CallbackProxyFn = Box<dyn Fn(ProxiedCall) + Send + Sync>;

pub(crate) struct MatchEntry {
    pub(crate) rule: MatchRule,
    pub(crate) callback: MatchCallback,
}

pub(crate) struct ReplyEntry {
    pub(crate) callback: Option<ReplyCallback>,
    pub(crate) expected_remote: Option<Box<str>>,
}

/// What state a [`Connection`] is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Ready,
    Closed,
}

/// The callback a host supplies to actually move bytes to the wire. The
/// only egress point for a [`Connection`].
pub type SendFn = Box<dyn FnMut(&[u8]) -> std::io::Result<()>>;

/// A sans-IO D-Bus connection: serials, match rules, reply registrations,
/// and path/interface bindings, dispatched from parsed bytes.
///
/// The connection itself never reads or writes a socket; a host feeds
/// received bytes to [`Connection::parse`] and drains outgoing bytes via
/// the `send` callback supplied at construction.
pub struct Connection {
    state: ConnectionState,
    endianness: Endianness,
    next_serial: u32,
    next_match_id: u64,
    next_reply_id: u64,
    matches: Vec<(MatchId, MatchEntry)>,
    replies: HashMap<u32, (ReplyId, ReplyEntry)>,
    bindings: HashMap<ObjectPathBuf, HashMap<Box<str>, InterfaceHandle>>,
    unique_name: Option<Box<str>>,
    frame: Frame,
    send: SendFn,
    forward_matches_to_bus: bool,
    #[cfg(feature = "cross-thread-proxy")]
    message_proxy: Option<MessageProxyFn>,
    #[cfg(feature = "cross-thread-proxy")]
    callback_proxy: Option<CallbackProxyFn>,
}

impl Connection {
    pub(crate) fn new(send: SendFn, forward_matches_to_bus: bool) -> Self {
        Self {
            state: ConnectionState::Connecting,
            endianness: Endianness::NATIVE,
            next_serial: 1,
            next_match_id: 1,
            next_reply_id: 1,
            matches: Vec::new(),
            replies: HashMap::new(),
            bindings: HashMap::new(),
            unique_name: None,
            frame: Frame::new(),
            send,
            forward_matches_to_bus,
            #[cfg(feature = "cross-thread-proxy")]
            message_proxy: None,
            #[cfg(feature = "cross-thread-proxy")]
            callback_proxy: None,
        }
    }

    /// Install the hooks a [`ConnectionBuilder`] was configured with. A
    /// `None` hook means that class of callback runs inline, as if the
    /// feature were off.
    #[cfg(feature = "cross-thread-proxy")]
    pub(crate) fn set_proxies(
        &mut self,
        message_proxy: Option<MessageProxyFn>,
        callback_proxy: Option<CallbackProxyFn>,
    ) {
        self.message_proxy = message_proxy;
        self.callback_proxy = callback_proxy;
    }

    #[cfg(feature = "cross-thread-proxy")]
    pub(crate) fn run_proxied_match(&self, call: ProxiedCall) {
        match &self.message_proxy {
            Some(proxy) => proxy(call),
            None => call(),
        }
    }

    #[cfg(feature = "cross-thread-proxy")]
    pub(crate) fn run_proxied_reply(&self, call: ProxiedCall) {
        match &self.callback_proxy {
            Some(proxy) => proxy(call),
            None => call(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    pub(crate) fn set_unique_name(&mut self, name: impl Into<Box<str>>) {
        self.unique_name = Some(name.into());
        self.state = ConnectionState::Ready;
    }

    pub(crate) fn mark_authenticated(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Authenticated;
        }
    }

    /// The next serial to assign to an outgoing message, skipping zero on
    /// wraparound.
    pub fn serial(&mut self) -> Serial {
        let value = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        if self.next_serial == 0 {
            self.next_serial = 1;
        }
        Serial::new(value).expect("serial is never assigned zero")
    }

    /// Serialize and send `message`, assigning a fresh serial if none was
    /// set on it. Moves the connection to `Closed` if the send callback
    /// fails.
    pub fn send(&mut self, mut message: Message) -> Result<Serial> {
        if self.state == ConnectionState::Closed {
            return Err(Error::new(ErrorKind::Closed));
        }
        let serial = self.serial();
        message.serial = serial;
        let bytes = message.build(serial, self.endianness)?;
        match (self.send)(&bytes) {
            Ok(()) => {
                tracing::trace!(serial = serial.get(), "sent message");
                Ok(serial)
            }
            Err(error) => {
                tracing::warn!(?error, "send callback failed, closing connection");
                self.close();
                Err(Error::new(ErrorKind::SendFailed))
            }
        }
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            for (_, entry) in self.replies.drain() {
                if let Some(callback) = entry.1.callback {
                    callback(ReplyOutcome::Cancelled);
                }
            }
        }
    }

    /// Register a match rule; returns an id stable for this connection's
    /// lifetime that can later be passed to [`Connection::remove_match`].
    pub fn add_match(&mut self, rule: MatchRule, callback: MatchCallback) -> MatchId {
        let id = MatchId(self.next_match_id);
        self.next_match_id += 1;
        let forward = rule.add_match_to_bus || self.forward_matches_to_bus;
        self.matches.push((id, MatchEntry { rule, callback }));
        if forward {
            tracing::debug!(?id, "forwarding AddMatch to bus daemon is the host's responsibility");
        }
        id
    }

    pub fn remove_match(&mut self, id: MatchId) {
        self.matches.retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Register a one-shot reply callback for `serial`, a call sent to
    /// `remote` (the call's destination, which may be a well-known name).
    ///
    /// Matching is keyed on `serial` alone: a connection assigns its own
    /// serials, so the bus only ever routes a given `reply_serial` back to
    /// the call that produced it, regardless of which unique name the
    /// reply's `sender` carries. `remote` is kept only as a diagnostic: if
    /// a reply arrives whose `sender` never resolves to it, that's logged
    /// rather than treated as a mismatch, since callers normally address
    /// well-known names while replies carry the callee's unique name.
    pub fn add_reply(
        &mut self,
        remote: Option<&str>,
        serial: Serial,
        callback: ReplyCallback,
    ) -> ReplyId {
        let id = ReplyId(self.next_reply_id);
        self.next_reply_id += 1;
        self.replies.insert(
            serial.get(),
            (
                id,
                ReplyEntry {
                    callback: Some(callback),
                    expected_remote: remote.map(Into::into),
                },
            ),
        );
        id
    }

    pub fn remove_reply(&mut self, id: ReplyId) {
        let key = self
            .replies
            .iter()
            .find(|(_, (entry_id, _))| *entry_id == id)
            .map(|(key, _)| *key);
        if let Some(key) = key {
            if let Some((_, mut entry)) = self.replies.remove(&key) {
                if let Some(callback) = entry.callback.take() {
                    callback(ReplyOutcome::Cancelled);
                }
            }
        }
    }

    /// Bind `interface` at `path`. Fails with [`ErrorKind::BindCollision`]
    /// if that (path, interface name) pair is already bound.
    pub fn bind(&mut self, path: ObjectPathBuf, interface: InterfaceHandle) -> Result<()> {
        let by_interface = self.bindings.entry(path).or_default();
        if by_interface.contains_key(&interface.name) {
            return Err(Error::new(ErrorKind::BindCollision));
        }
        by_interface.insert(interface.name.clone(), interface);
        Ok(())
    }

    pub fn unbind(&mut self, path: &crate::object_path::ObjectPath, interface_name: &str) {
        if let Some(by_interface) = self.bindings.get_mut(path) {
            by_interface.remove(interface_name);
        }
    }

    pub fn bindings_at(&self, path: &crate::object_path::ObjectPath) -> Option<&HashMap<Box<str>, InterfaceHandle>> {
        self.bindings.get(path)
    }

    pub fn bound_paths(&self) -> impl Iterator<Item = &ObjectPathBuf> {
        self.bindings.keys()
    }

    /// Feed newly received bytes in; dispatches every whole message found.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<()> {
        self.frame.extend(bytes);
        loop {
            let message = match self.frame.next_message()? {
                Some(message) => message,
                None => break,
            };
            self.dispatch(message)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        dispatch::dispatch(self, message)
    }

    pub(crate) fn replies_mut(&mut self) -> &mut HashMap<u32, (ReplyId, ReplyEntry)> {
        &mut self.replies
    }

    pub(crate) fn matches_mut(&mut self) -> &mut Vec<(MatchId, MatchEntry)> {
        &mut self.matches
    }

    pub(crate) fn bindings(&self) -> &HashMap<ObjectPathBuf, HashMap<Box<str>, InterfaceHandle>> {
        &self.bindings
    }
}
