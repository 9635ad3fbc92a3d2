//! Drives a [`Connection`]/[`Server`] pair entirely in memory: every
//! "wire" hop is an explicit `Vec<u8>` handed from one side's `send`
//! callback to the other side's `parse`, with the bus itself routing
//! structs (not bytes) between connections the way an in-process broker
//! would.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use dbus_core::org_freedesktop_dbus::{self, NameFlag};
use dbus_core::{
    ConnectionBuilder, DBusError, Endianness, Interface, Message, ObjectPath, ObjectPathBuf,
    ReplyOutcome, Server, Signature, Variant,
};

fn to_io_error(error: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(error.to_string())
}

#[test]
fn method_call_round_trips_through_the_server_to_a_bound_interface() -> Result<()> {
    let mut server = Server::new();

    let (callee_id, _callee_unique) = server.connect(Some(1000), Some(1));
    server
        .request_name(callee_id, "com.x.Calc", NameFlag::empty())
        .map_err(|error| anyhow!("{error}"))?;

    let callee_outbox: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let callee_outbox_tx = callee_outbox.clone();
    let callee_conn = Rc::new(RefCell::new(ConnectionBuilder::new().build(move |bytes| {
        callee_outbox_tx.borrow_mut().push(bytes.to_vec());
        Ok(())
    })));

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
    callee_conn
        .borrow_mut()
        .bind(ObjectPathBuf::new(b"/calc")?, Rc::new(iface))?;

    let callee_conn_for_sink = callee_conn.clone();
    server.set_remote_sink(
        callee_id,
        Box::new(move |message| {
            let bytes = message
                .build(message.serial, Endianness::NATIVE)
                .map_err(to_io_error)?;
            callee_conn_for_sink.borrow_mut().parse(&bytes).map_err(to_io_error)
        }),
    );

    let (caller_id, caller_unique) = server.connect(Some(1000), Some(2));
    let caller_outbox: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let caller_outbox_tx = caller_outbox.clone();
    let caller_conn = Rc::new(RefCell::new(ConnectionBuilder::new().build(move |bytes| {
        caller_outbox_tx.borrow_mut().push(bytes.to_vec());
        Ok(())
    })));

    let caller_conn_for_sink = caller_conn.clone();
    server.set_remote_sink(
        caller_id,
        Box::new(move |message| {
            let bytes = message
                .build(message.serial, Endianness::NATIVE)
                .map_err(to_io_error)?;
            caller_conn_for_sink.borrow_mut().parse(&bytes).map_err(to_io_error)
        }),
    );

    let reply_body: Rc<RefCell<Option<Vec<Variant>>>> = Rc::new(RefCell::new(None));
    let reply_body_tx = reply_body.clone();

    let mut call = Message::method_call(ObjectPath::new(b"/calc")?, Some("com.x.Calc"), "Double")
        .with_body(vec![Variant::UInt32(21)])
        .with_destination("com.x.Calc");
    call.sender = Some(caller_unique);

    let serial = caller_conn.borrow_mut().send(call)?;
    caller_conn.borrow_mut().add_reply(
        Some("com.x.Calc"),
        serial,
        Box::new(move |outcome| {
            if let ReplyOutcome::Success(message) = outcome {
                *reply_body_tx.borrow_mut() = Some(message.body.clone());
            }
        }),
    );

    // Hop 1: caller -> bus. The bus forwards the call to whoever owns
    // "com.x.Calc", which synchronously dispatches it and queues a
    // reply in the callee's own outbox.
    for bytes in caller_outbox.borrow_mut().drain(..).collect::<Vec<_>>() {
        let (message, _) = Message::parse(&bytes)?;
        server.route(caller_id, &message);
    }
    assert!(reply_body.borrow().is_none(), "reply should not have arrived yet");

    // Hop 2: callee -> bus -> caller.
    let replies = callee_outbox.borrow_mut().drain(..).collect::<Vec<_>>();
    assert_eq!(replies.len(), 1, "the callee should have answered exactly once");
    for bytes in replies {
        let (message, _) = Message::parse(&bytes)?;
        server.route(callee_id, &message);
    }

    assert_eq!(reply_body.borrow().as_deref(), Some([Variant::UInt32(42)].as_slice()));
    Ok(())
}

#[test]
fn calling_an_unowned_destination_reports_service_unknown() -> Result<()> {
    let mut server = Server::new();
    let (caller_id, caller_unique) = server.connect(Some(1000), Some(1));

    let caller_outbox: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let caller_outbox_tx = caller_outbox.clone();
    let caller_conn = Rc::new(RefCell::new(ConnectionBuilder::new().build(move |bytes| {
        caller_outbox_tx.borrow_mut().push(bytes.to_vec());
        Ok(())
    })));

    let caller_conn_for_sink = caller_conn.clone();
    server.set_remote_sink(
        caller_id,
        Box::new(move |message| {
            let bytes = message
                .build(message.serial, Endianness::NATIVE)
                .map_err(to_io_error)?;
            caller_conn_for_sink.borrow_mut().parse(&bytes).map_err(to_io_error)
        }),
    );

    let error: Rc<RefCell<Option<DBusError>>> = Rc::new(RefCell::new(None));
    let error_tx = error.clone();

    let mut call = Message::method_call(ObjectPath::new(b"/obj")?, Some("com.x.Iface"), "DoThing")
        .with_destination("com.x.Nobody");
    call.sender = Some(caller_unique);

    let serial = caller_conn.borrow_mut().send(call)?;
    caller_conn.borrow_mut().add_reply(
        Some("com.x.Nobody"),
        serial,
        Box::new(move |outcome| {
            if let ReplyOutcome::Error(dbus_error) = outcome {
                *error_tx.borrow_mut() = Some(dbus_error.clone());
            }
        }),
    );

    for bytes in caller_outbox.borrow_mut().drain(..).collect::<Vec<_>>() {
        let (message, _) = Message::parse(&bytes)?;
        server.route(caller_id, &message);
    }

    let error = error.borrow();
    let error = error.as_ref().ok_or_else(|| anyhow!("expected a ServiceUnknown reply"))?;
    assert_eq!(error.name(), org_freedesktop_dbus::error_name::SERVICE_UNKNOWN);
    Ok(())
}
