//! XML generation for `org.freedesktop.DBus.Introspectable.Introspect`.

use std::fmt::Write as _;

use crate::connection::Connection;
use crate::interface::PropertyAccess;
use crate::object_path::ObjectPath;

/// Build the introspection XML document for every interface bound at
/// `path`, plus one `<node>` child per direct sub-path that has any
/// binding beneath it.
pub fn introspect(connection: &Connection, path: &ObjectPath) -> String {
    let mut xml = String::new();
    xml.push_str("<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n");
    xml.push_str("\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n");
    xml.push_str("<node>\n");

    if let Some(by_interface) = connection.bindings().get(path) {
        for iface in by_interface.values() {
            write_interface(&mut xml, iface);
        }
    }

    for child in direct_children(connection, path) {
        let _ = writeln!(xml, "  <node name=\"{child}\"/>");
    }

    xml.push_str("</node>\n");
    xml
}

fn write_interface(xml: &mut String, iface: &crate::interface::Interface) {
    let _ = writeln!(xml, "  <interface name=\"{}\">", iface.name);
    for method in &iface.methods {
        let _ = writeln!(xml, "    <method name=\"{}\">", method.name);
        for ty in method.in_signature.as_signature().iter() {
            let _ = writeln!(xml, "      <arg direction=\"in\" type=\"{}\"/>", type_str(ty));
        }
        for ty in method.out_signature.as_signature().iter() {
            let _ = writeln!(xml, "      <arg direction=\"out\" type=\"{}\"/>", type_str(ty));
        }
        for (key, value) in &method.annotations {
            let _ = writeln!(xml, "      <annotation name=\"{key}\" value=\"{value}\"/>");
        }
        xml.push_str("    </method>\n");
    }
    for signal in &iface.signals {
        let _ = writeln!(xml, "    <signal name=\"{}\">", signal.name);
        for ty in signal.signature.as_signature().iter() {
            let _ = writeln!(xml, "      <arg type=\"{}\"/>", type_str(ty));
        }
        xml.push_str("    </signal>\n");
    }
    for property in &iface.properties {
        let access = match property.access {
            PropertyAccess::Read => "read",
            PropertyAccess::Write => "write",
            PropertyAccess::ReadWrite => "readwrite",
        };
        let _ = writeln!(
            xml,
            "    <property name=\"{}\" type=\"{}\" access=\"{access}\"/>",
            property.name,
            property.signature.as_signature()
        );
    }
    xml.push_str("  </interface>\n");
}

fn type_str(ty: crate::signature::Type<'_>) -> String {
    match ty {
        crate::signature::Type::Basic(code) => (code as char).to_string(),
        crate::signature::Type::Variant => "v".to_string(),
        crate::signature::Type::Array(elem) => format!("a{elem}"),
        crate::signature::Type::Struct(fields) => format!("({fields})"),
        crate::signature::Type::Dict(key, value) => format!("a{{{key}{value}}}"),
    }
}

fn direct_children(connection: &Connection, path: &ObjectPath) -> Vec<String> {
    let mut children = std::collections::BTreeSet::new();
    for bound in connection.bound_paths() {
        if bound.as_object_path() == path {
            continue;
        }
        if !bound.starts_with(path) {
            continue;
        }
        let prefix_len = if path.is_root() { 1 } else { path.len() + 1 };
        if bound.len() <= prefix_len {
            continue;
        }
        let rest = &bound.as_bytes()[prefix_len..];
        let first_segment_len = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        if let Ok(segment) = core::str::from_utf8(&rest[..first_segment_len]) {
            children.insert(segment.to_string());
        }
    }
    children.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionBuilder;
    use crate::interface::Interface;
    use crate::object_path::ObjectPathBuf;
    use crate::signature::Signature;
    use std::rc::Rc;

    #[test]
    fn introspects_bound_interface() {
        let mut connection = ConnectionBuilder::new().build(|_| Ok(()));
        let mut iface = Interface::new("com.x.Test");
        iface.add_method("Quit", Signature::EMPTY, Signature::EMPTY, Box::new(|_| Ok(Vec::new())));
        connection
            .bind(ObjectPathBuf::new(b"/a").unwrap(), Rc::new(iface))
            .unwrap();

        let xml = introspect(&connection, ObjectPath::new(b"/a").unwrap());
        assert!(xml.contains("com.x.Test"));
        assert!(xml.contains("Quit"));
    }

    #[test]
    fn lists_direct_children() {
        let mut connection = ConnectionBuilder::new().build(|_| Ok(()));
        let iface = Interface::new("com.x.Test");
        connection
            .bind(ObjectPathBuf::new(b"/a/b").unwrap(), Rc::new(iface))
            .unwrap();

        let xml = introspect(&connection, ObjectPath::new(b"/a").unwrap());
        assert!(xml.contains("<node name=\"b\"/>"));
    }
}
