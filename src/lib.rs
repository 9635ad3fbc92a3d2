//! A sans-IO implementation of the D-Bus IPC protocol.
//!
//! This crate owns the wire codec, message framing, SASL authentication,
//! match rules, and connection dispatch. It never opens a socket itself:
//! a host feeds received bytes to [`connection::Connection::parse`] and
//! drains outgoing bytes through the `send` callback supplied to
//! [`connection::ConnectionBuilder::build`], keeping the codec and
//! framing free of any particular reactor.

#[doc(inline)]
pub use self::error::{DBusError, Error, Result};
pub mod error;

pub use self::marshal::{Endianness, Marshaller};
mod marshal;

pub use self::decode::Iter as Decoder;
mod decode;

#[doc(inline)]
pub use self::signature::{Signature, SignatureBuf, SignatureError};
pub mod signature;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathBuf, ObjectPathError};
pub mod object_path;

pub use self::variant::Variant;
mod variant;

mod buf;
mod ty;

pub use self::message::{Flags, Message, MessageKind, Serial};
pub mod message;

pub mod sasl;

pub use self::match_rule::{ArgMatch, MatchRule, MatchType};
pub mod match_rule;

pub use self::interface::{Interface, InterfaceHandle, Method, MethodContext, Property, PropertyAccess, Signal};
pub mod interface;

pub use self::state::State;
mod state;

#[doc(inline)]
pub use self::connection::{Connection, ConnectionBuilder, ConnectionState, MatchId, ReplyId, ReplyOutcome};
pub mod connection;

pub mod introspect;

pub mod org_freedesktop_dbus;

pub mod address;

pub use self::proxy::{CallError, Proxy};
mod proxy;

pub use self::server::{RemoteId, Server};
mod server;

mod hex;

#[cfg(test)]
mod tests {
    use super::*;

    /// S5: a bound interface receives a routed call and replies, driven
    /// entirely through `Connection::parse` and the `send` callback.
    #[test]
    fn s5_dispatch_call_and_reply() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = sent.clone();
        let mut server_conn = ConnectionBuilder::new().build(move |bytes| {
            sent_clone.borrow_mut().push(bytes.to_vec());
            Ok(())
        });

        let mut iface = Interface::new("com.x.Calc");
        iface.add_method(
            "Double",
            Signature::UINT32,
            Signature::UINT32,
            Box::new(|ctx| match ctx.args.first() {
                Some(Variant::UInt32(n)) => Ok(vec![Variant::UInt32(n * 2)]),
                _ => Err(DBusError::new("com.x.Error.BadArgs", None)),
            }),
        );
        server_conn
            .bind(ObjectPathBuf::new(b"/calc").unwrap(), std::rc::Rc::new(iface))
            .unwrap();

        let call = Message::method_call(
            ObjectPath::new(b"/calc").unwrap(),
            Some("com.x.Calc"),
            "Double",
        )
        .with_body(vec![Variant::UInt32(21)]);
        let mut call = call;
        call.sender = Some("com.x.Client".into());
        let bytes = call.build(Serial::new(5).unwrap(), Endianness::NATIVE).unwrap();

        server_conn.parse(&bytes).unwrap();

        assert_eq!(sent.borrow().len(), 1);
        let (reply, _) = Message::parse(&sent.borrow()[0]).unwrap();
        assert!(matches!(reply.kind, MessageKind::MethodReturn { .. }));
        assert_eq!(reply.body, vec![Variant::UInt32(42)]);
    }

    /// S6: `RequestName` queues a second requester behind the first, and
    /// disconnecting the owner promotes the queued remote.
    #[test]
    fn s6_name_queueing_and_disconnect_promotion() {
        let mut server = Server::new();
        let (first, _) = server.connect(Some(1000), Some(42));
        let (second, _) = server.connect(Some(1001), Some(43));

        let reply = server
            .request_name(first, "com.x.Svc", org_freedesktop_dbus::NameFlag::empty())
            .unwrap();
        assert_eq!(reply, org_freedesktop_dbus::NameReply::PrimaryOwner);

        let reply = server
            .request_name(second, "com.x.Svc", org_freedesktop_dbus::NameFlag::empty())
            .unwrap();
        assert_eq!(reply, org_freedesktop_dbus::NameReply::InQueue);

        let released = server.disconnect(first);
        assert_eq!(&*released[0], "com.x.Svc");
        assert_eq!(server.resolve("com.x.Svc"), server.unique_name_of(second));
    }
}
