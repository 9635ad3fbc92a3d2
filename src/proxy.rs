//! Method-call composition and reply wiring for a single remote.
//!
//! Grounded on adbus's `adbus_Proxy`/`adbus_Call` pair
//! (`proxy.c`: `adbus_call_method`, `adbus_call_send`, `adbus_call_block`).
//! adbus's blocking call spins the connection's own event loop from
//! inside `adbus_call_block`; this crate's `Connection` owns no loop, so
//! [`Proxy::call_blocking`] instead takes a `pump` closure the host
//! supplies to drive its own transport until the reply lands.

use std::cell::RefCell;
use std::rc::Rc;

use crate::connection::{Connection, ReplyId, ReplyOutcome};
use crate::error::{DBusError, Error, ErrorKind, Result};
use crate::message::Message;
use crate::object_path::ObjectPathBuf;
use crate::variant::Variant;

/// A bound destination/path/interface triple that composes method calls
/// against one remote object, the way adbus's `adbus_Proxy` does.
pub struct Proxy {
    destination: Box<str>,
    path: ObjectPathBuf,
    interface: Option<Box<str>>,
}

impl Proxy {
    pub fn new(destination: impl Into<Box<str>>, path: ObjectPathBuf) -> Self {
        Self {
            destination: destination.into(),
            path,
            interface: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<Box<str>>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    fn build_call(&self, member: &str, args: Vec<Variant>) -> Message {
        Message::method_call(self.path.as_object_path(), self.interface.as_deref(), member)
            .with_body(args)
            .with_destination(self.destination.clone())
    }

    /// Send `member(args)` and invoke `on_reply` when the method returns
    /// or errors, or if the connection is torn down before it does.
    /// Returns the reply registration id so the caller can cancel it.
    pub fn call(
        &self,
        connection: &mut Connection,
        member: &str,
        args: Vec<Variant>,
        on_reply: impl FnOnce(ReplyOutcome<'_>) + 'static,
    ) -> Result<ReplyId> {
        let message = self.build_call(member, args);
        let serial = connection.send(message)?;
        Ok(connection.add_reply(Some(self.destination.as_ref()), serial, Box::new(on_reply)))
    }

    /// Send `member(args)` without registering for a reply, the way
    /// `adbus_call_send` behaves when no reply callback is set.
    pub fn call_no_reply(&self, connection: &mut Connection, member: &str, args: Vec<Variant>) -> Result<()> {
        let message = self
            .build_call(member, args)
            .with_flags(crate::message::Flags::NO_REPLY_EXPECTED);
        connection.send(message)?;
        Ok(())
    }

    /// Send `member(args)` and block by repeatedly invoking `pump` (which
    /// should feed newly received bytes to `connection.parse` or similar)
    /// until the reply arrives. `pump` returning `Ok(false)` means "no
    /// more progress is possible" and aborts the call with
    /// [`ErrorKind::WouldBlock`].
    pub fn call_blocking(
        &self,
        connection: &mut Connection,
        member: &str,
        args: Vec<Variant>,
        mut pump: impl FnMut(&mut Connection) -> Result<bool>,
    ) -> Result<Vec<Variant>, CallError> {
        let outcome: Rc<RefCell<Option<Result<Vec<Variant>, DBusError>>>> = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        self.call(connection, member, args, move |reply| {
            let result = match reply {
                ReplyOutcome::Success(message) => Ok(message.body.clone()),
                ReplyOutcome::Error(error) => Err(error.clone()),
                ReplyOutcome::Cancelled => Err(DBusError::new("org.freedesktop.DBus.Error.NoReply", None)),
            };
            *slot.borrow_mut() = Some(result);
        })
        .map_err(CallError::Local)?;

        loop {
            if let Some(result) = outcome.borrow_mut().take() {
                return result.map_err(CallError::Remote);
            }
            if !pump(connection).map_err(CallError::Local)? {
                return Err(CallError::Local(Error::new(ErrorKind::WouldBlock)));
            }
        }
    }
}

/// Either a local failure (send/parse error) or a remote-reported
/// [`DBusError`], kept distinct so callers can match on which occurred.
#[derive(Debug)]
pub enum CallError {
    Local(Error),
    Remote(DBusError),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Local(error) => write!(f, "{error}"),
            CallError::Remote(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionBuilder;
    use crate::message::MessageKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn call_matches_reply_from_the_callee_unique_name_not_the_destination() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = sent.clone();
        let mut connection = ConnectionBuilder::new().build(move |bytes| {
            sent_clone.borrow_mut().push(bytes.to_vec());
            Ok(())
        });

        let proxy = Proxy::new("com.x.Service", ObjectPathBuf::new(b"/obj").unwrap())
            .with_interface("com.x.Iface");

        let got = Rc::new(RefCell::new(None));
        let got_clone = got.clone();
        proxy
            .call(&mut connection, "Ping", Vec::new(), move |outcome| {
                if let ReplyOutcome::Success(message) = outcome {
                    *got_clone.borrow_mut() = Some(message.body.clone());
                }
            })
            .unwrap();

        assert_eq!(sent.borrow().len(), 1);
        let (sent_message, _) = Message::parse(&sent.borrow()[0]).unwrap();
        let reply_serial = match sent_message.kind {
            MessageKind::MethodCall { .. } => sent_message.serial,
            _ => panic!("expected a method call"),
        };

        // A real bus reply carries the callee's unique name as `sender`,
        // never the well-known destination the call was addressed to.
        let mut reply = Message::method_return(reply_serial).with_body(vec![Variant::Byte(7)]);
        reply.sender = Some(":1.42".into());
        let bytes = reply
            .build(crate::message::Serial::new(99).unwrap(), crate::marshal::Endianness::NATIVE)
            .unwrap();
        connection.parse(&bytes).unwrap();

        assert_eq!(got.borrow().as_deref(), Some([Variant::Byte(7)].as_slice()));
    }
}
