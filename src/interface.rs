//! Declarative interface descriptions: methods, signals, and properties.

use std::collections::BTreeMap;
#[cfg(not(feature = "cross-thread-proxy"))]
use std::rc::Rc;
#[cfg(feature = "cross-thread-proxy")]
use std::sync::Arc;

use crate::error::{DBusError, Result};
use crate::signature::{Signature, SignatureBuf};
use crate::variant::Variant;

/// Context handed to a method handler: the already-checked arguments and
/// a place to write the return values.
pub struct MethodContext<'a> {
    pub args: &'a [Variant],
    pub user_data: &'a dyn std::any::Any,
}

#[cfg(not(feature = "cross-thread-proxy"))]
pub type MethodHandler = Box<dyn Fn(MethodContext<'_>) -> Result<Vec<Variant>, DBusError>>;
#[cfg(feature = "cross-thread-proxy")]
pub type MethodHandler = Box<dyn Fn(MethodContext<'_>) -> Result<Vec<Variant>, DBusError> + Send + Sync>;

#[cfg(not(feature = "cross-thread-proxy"))]
pub type PropertyGetter = Box<dyn Fn(&dyn std::any::Any) -> Variant>;
#[cfg(feature = "cross-thread-proxy")]
pub type PropertyGetter = Box<dyn Fn(&dyn std::any::Any) -> Variant + Send + Sync>;

#[cfg(not(feature = "cross-thread-proxy"))]
pub type PropertySetter = Box<dyn Fn(&dyn std::any::Any, &Variant) -> Result<(), DBusError>>;
#[cfg(feature = "cross-thread-proxy")]
pub type PropertySetter = Box<dyn Fn(&dyn std::any::Any, &Variant) -> Result<(), DBusError> + Send + Sync>;

pub struct Method {
    pub name: Box<str>,
    pub in_signature: SignatureBuf,
    pub out_signature: SignatureBuf,
    pub handler: MethodHandler,
    pub annotations: BTreeMap<Box<str>, Box<str>>,
}

pub struct Signal {
    pub name: Box<str>,
    pub signature: SignatureBuf,
    pub annotations: BTreeMap<Box<str>, Box<str>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PropertyAccess {
    Read,
    Write,
    ReadWrite,
}

pub struct Property {
    pub name: Box<str>,
    pub signature: SignatureBuf,
    pub access: PropertyAccess,
    pub getter: Option<PropertyGetter>,
    pub setter: Option<PropertySetter>,
    pub emits_changed: bool,
}

/// A named collection of methods, signals, and properties that can be
/// bound at one or more object paths.
#[derive(Default)]
pub struct Interface {
    pub name: Box<str>,
    pub methods: Vec<Method>,
    pub signals: Vec<Signal>,
    pub properties: Vec<Property>,
}

impl Interface {
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            signals: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn add_method(
        &mut self,
        name: impl Into<Box<str>>,
        in_signature: &Signature,
        out_signature: &Signature,
        handler: MethodHandler,
    ) -> &mut Self {
        self.methods.push(Method {
            name: name.into(),
            in_signature: in_signature.to_owned(),
            out_signature: out_signature.to_owned(),
            handler,
            annotations: BTreeMap::new(),
        });
        self
    }

    pub fn add_signal(&mut self, name: impl Into<Box<str>>, signature: &Signature) -> &mut Self {
        self.signals.push(Signal {
            name: name.into(),
            signature: signature.to_owned(),
            annotations: BTreeMap::new(),
        });
        self
    }

    pub fn add_property(
        &mut self,
        name: impl Into<Box<str>>,
        signature: &Signature,
        access: PropertyAccess,
        getter: Option<PropertyGetter>,
        setter: Option<PropertySetter>,
    ) -> &mut Self {
        self.properties.push(Property {
            name: name.into(),
            signature: signature.to_owned(),
            access,
            getter,
            setter,
            emits_changed: false,
        });
        self
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| &*m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| &*p.name == name)
    }
}

/// A shared handle to an [`Interface`]. `Rc` suffices for the common
/// single-threaded-reactor case; with the `cross-thread-proxy` feature
/// enabled this becomes `Arc` instead, since a bound interface may then
/// be reached from a handler invocation proxied onto another thread.
/// Call sites never change: they go through this alias either way.
#[cfg(not(feature = "cross-thread-proxy"))]
pub type InterfaceHandle = Rc<Interface>;
#[cfg(feature = "cross-thread-proxy")]
pub type InterfaceHandle = Arc<Interface>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_interface_table() {
        let mut iface = Interface::new("com.x.Test");
        iface.add_method(
            "Quit",
            Signature::EMPTY,
            Signature::EMPTY,
            Box::new(|_ctx| Ok(Vec::new())),
        );
        iface.add_property(
            "Value",
            Signature::UINT32,
            PropertyAccess::Read,
            Some(Box::new(|_| Variant::UInt32(1))),
            None,
        );
        assert!(iface.method("Quit").is_some());
        assert!(iface.property("Value").is_some());
        assert!(iface.method("Missing").is_none());
    }
}
