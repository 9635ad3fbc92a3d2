use super::{Connection, MatchFlow, ReplyOutcome};
use crate::error::{DBusError, Result};
use crate::interface::MethodContext;
use crate::message::{Message, MessageKind};
use crate::org_freedesktop_dbus::error_name;
use crate::variant::Variant;

const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
const PEER: &str = "org.freedesktop.DBus.Peer";

/// Deterministic per-message dispatch, per the connection's documented
/// ordering: reply registrations first, then match rules in insertion
/// order, then method-call routing to bound interfaces.
pub(super) fn dispatch(connection: &mut Connection, message: Message) -> Result<()> {
    let sender = message.sender.clone();

    if let MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. } = &message.kind {
        if let Some((_, mut entry)) = connection.replies_mut().remove(&reply_serial.get()) {
            if let Some(expected) = &entry.expected_remote {
                if sender.as_deref() != Some(expected.as_ref()) {
                    tracing::debug!(
                        expected = %expected,
                        sender = sender.as_deref().unwrap_or("<none>"),
                        "reply sender does not match the call's destination name; accepting by serial anyway"
                    );
                }
            }
            if let Some(callback) = entry.callback.take() {
                #[cfg(not(feature = "cross-thread-proxy"))]
                {
                    match &message.kind {
                        MessageKind::MethodReturn { .. } => callback(ReplyOutcome::Success(&message)),
                        MessageKind::Error { error_name, .. } => {
                            let text = message.body.first().and_then(|v| v.as_str()).map(Into::into);
                            let error = DBusError::new(error_name.clone(), text);
                            callback(ReplyOutcome::Error(&error));
                        }
                        _ => unreachable!(),
                    }
                }
                #[cfg(feature = "cross-thread-proxy")]
                {
                    match &message.kind {
                        MessageKind::MethodReturn { .. } => {
                            let reply = message.clone();
                            connection.run_proxied_reply(Box::new(move || {
                                callback(ReplyOutcome::Success(&reply));
                            }));
                        }
                        MessageKind::Error { error_name, .. } => {
                            let text = message.body.first().and_then(|v| v.as_str()).map(Into::into);
                            let error = DBusError::new(error_name.clone(), text);
                            connection.run_proxied_reply(Box::new(move || {
                                callback(ReplyOutcome::Error(&error));
                            }));
                        }
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    let matches = core::mem::take(connection.matches_mut());
    let mut retained = Vec::with_capacity(matches.len());
    let mut matches = matches.into_iter();
    for (id, mut entry) in matches.by_ref() {
        let mut remove = false;
        if entry.rule.matches(&message, sender.as_deref()) {
            #[cfg(not(feature = "cross-thread-proxy"))]
            let flow = (entry.callback)(&message, sender.as_deref());
            #[cfg(feature = "cross-thread-proxy")]
            let flow = run_match_callback(connection, &mut entry, &message, sender.as_deref());
            if entry.rule.remove_on_first_match {
                remove = true;
            }
            if flow == MatchFlow::Stop {
                if !remove {
                    retained.push((id, entry));
                }
                break;
            }
        }
        if !remove {
            retained.push((id, entry));
        }
    }
    retained.extend(matches);
    *connection.matches_mut() = retained;

    if let MessageKind::MethodCall { path, interface, member } = &message.kind {
        handle_method_call(connection, &message, path, interface.as_deref(), member)?;
    }

    Ok(())
}

/// Run a match callback through `connection`'s configured message proxy,
/// handing it owned copies of the message and sender since the proxied
/// closure must be `'static`. The callback itself is only ever borrowed
/// out of `entry` for the duration of the call and always put back,
/// since a [`super::MatchEntry`] is reused across future messages.
#[cfg(feature = "cross-thread-proxy")]
fn run_match_callback(
    connection: &Connection,
    entry: &mut super::MatchEntry,
    message: &Message,
    sender: Option<&str>,
) -> MatchFlow {
    use std::sync::{Arc, Mutex};

    let owned_message = message.clone();
    let owned_sender = sender.map(Box::<str>::from);
    let callback = core::mem::replace(&mut entry.callback, Box::new(|_, _| MatchFlow::Continue));
    let holder = Arc::new(Mutex::new(callback));
    let flow_slot = Arc::new(Mutex::new(MatchFlow::Continue));

    let proxy_holder = holder.clone();
    let proxy_flow_slot = flow_slot.clone();
    connection.run_proxied_match(Box::new(move || {
        let mut callback = proxy_holder.lock().expect("match callback mutex poisoned");
        let flow = callback(&owned_message, owned_sender.as_deref());
        *proxy_flow_slot.lock().expect("flow mutex poisoned") = flow;
    }));

    entry.callback = Arc::try_unwrap(holder)
        .unwrap_or_else(|_| panic!("message_proxy must run the call before returning"))
        .into_inner()
        .expect("match callback mutex poisoned");
    let flow = *flow_slot.lock().expect("flow mutex poisoned");
    flow
}

fn handle_method_call(
    connection: &mut Connection,
    message: &Message,
    path: &crate::object_path::ObjectPathBuf,
    interface: Option<&str>,
    member: &str,
) -> Result<()> {
    let reply_serial = message.serial;
    let sender = message.sender.clone();
    let no_reply_expected = message.flags.contains(crate::message::Flags::NO_REPLY_EXPECTED);

    let outcome = route(connection, message, path, interface, member);

    if no_reply_expected {
        return Ok(());
    }

    let mut reply = match outcome {
        Ok(values) => Message::method_return(reply_serial).with_body(values),
        Err(error) => Message::error(error.name(), reply_serial)
            .with_body(error.message().map(|m| vec![Variant::String(m.into())]).unwrap_or_default()),
    };
    if let Some(sender) = sender {
        reply = reply.with_destination(sender);
    }
    connection.send(reply)?;
    Ok(())
}

fn route(
    connection: &mut Connection,
    message: &Message,
    path: &crate::object_path::ObjectPathBuf,
    interface: Option<&str>,
    member: &str,
) -> Result<Vec<Variant>, DBusError> {
    if let Some(name) = interface {
        match name {
            PEER => return handle_peer(member),
            INTROSPECTABLE if member == "Introspect" => {
                let xml = crate::introspect::introspect(&*connection, path.as_object_path());
                return Ok(vec![Variant::String(xml.into())]);
            }
            PROPERTIES => return handle_properties(&*connection, message, path.as_object_path(), member),
            _ => {}
        }
    }

    let by_interface = connection
        .bindings()
        .get(path)
        .ok_or_else(|| unknown_object())?;

    let interface_name = interface.ok_or_else(invalid_args)?;
    let iface = by_interface
        .get(interface_name)
        .ok_or_else(unknown_interface)?;
    let method = iface.method(member).ok_or_else(unknown_method)?;

    let mut actual_signature = Vec::new();
    for value in &message.body {
        actual_signature.extend_from_slice(value.signature().as_bytes());
    }
    if actual_signature != method.in_signature.as_bytes() {
        return Err(invalid_args());
    }

    (method.handler)(MethodContext {
        args: &message.body,
        user_data: &(),
    })
}

fn handle_peer(member: &str) -> Result<Vec<Variant>, DBusError> {
    match member {
        "Ping" => Ok(Vec::new()),
        "GetMachineId" => Ok(vec![Variant::String("0".repeat(32).into())]),
        _ => Err(unknown_method()),
    }
}

fn handle_properties(
    connection: &Connection,
    message: &Message,
    path: &crate::object_path::ObjectPath,
    member: &str,
) -> Result<Vec<Variant>, DBusError> {
    let by_interface = connection.bindings().get(path).ok_or_else(unknown_object)?;

    match member {
        "Get" => {
            let interface_name = message.body.first().and_then(|v| v.as_str()).ok_or_else(invalid_args)?;
            let property_name = message.body.get(1).and_then(|v| v.as_str()).ok_or_else(invalid_args)?;
            let iface = by_interface.get(interface_name).ok_or_else(unknown_interface)?;
            let property = iface.property(property_name).ok_or_else(unknown_property)?;
            let getter = property.getter.as_ref().ok_or_else(property_write_only)?;
            Ok(vec![Variant::Variant(Box::new(getter(&())))])
        }
        "GetAll" => {
            let interface_name = message.body.first().and_then(|v| v.as_str()).ok_or_else(invalid_args)?;
            let iface = by_interface.get(interface_name).ok_or_else(unknown_interface)?;
            let entries = iface
                .properties
                .iter()
                .filter_map(|p| p.getter.as_ref().map(|g| (p.name.clone(), g(&()))))
                .map(|(name, value)| (Variant::String(name), Variant::Variant(Box::new(value))))
                .collect();
            Ok(vec![Variant::Dict(
                crate::signature::Signature::STRING.to_owned(),
                crate::signature::Signature::VARIANT.to_owned(),
                entries,
            )])
        }
        "Set" => {
            let interface_name = message.body.first().and_then(|v| v.as_str()).ok_or_else(invalid_args)?;
            let property_name = message.body.get(1).and_then(|v| v.as_str()).ok_or_else(invalid_args)?;
            let value = message.body.get(2).ok_or_else(invalid_args)?;
            let iface = by_interface.get(interface_name).ok_or_else(unknown_interface)?;
            let property = iface.property(property_name).ok_or_else(unknown_property)?;
            let setter = property.setter.as_ref().ok_or_else(property_read_only)?;
            setter(&(), value)?;
            Ok(Vec::new())
        }
        _ => Err(unknown_method()),
    }
}

fn unknown_object() -> DBusError {
    DBusError::new(error_name::UNKNOWN_OBJECT, None)
}

fn unknown_interface() -> DBusError {
    DBusError::new(error_name::UNKNOWN_INTERFACE, None)
}

fn unknown_method() -> DBusError {
    DBusError::new(error_name::UNKNOWN_METHOD, None)
}

fn unknown_property() -> DBusError {
    DBusError::new(error_name::UNKNOWN_PROPERTY, None)
}

fn property_read_only() -> DBusError {
    DBusError::new(error_name::PROPERTY_READ_ONLY, None)
}

fn property_write_only() -> DBusError {
    DBusError::new(error_name::PROPERTY_WRITE_ONLY, None)
}

fn invalid_args() -> DBusError {
    DBusError::new(error_name::INVALID_ARGS, None)
}
