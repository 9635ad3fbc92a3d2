//! Bus address string parsing.
//!
//! Grounded on the key/value address grammar documented by the
//! `ServerAddress` builders in `marcelbuesing-dbus-native`'s
//! `src/address.rs` (`unix:path=...`, `tcp:host=...,port=...`), inverted
//! here into a parser: this crate hands sockets to its host rather than
//! opening them itself, so only the address *string* needs understanding.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};

/// One parsed address out of a semicolon-separated address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `unix:path=/run/dbus/system_bus_socket` or `unix:abstract=...`.
    Unix(UnixAddress),
    /// `tcp:host=...,port=...[,family=ipv4|ipv6]`.
    Tcp(TcpAddress),
    /// `autolaunch:` or `autolaunch:scope=...` (session-bus autostart).
    Autolaunch { scope: Option<Box<str>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixAddress {
    pub path: Option<Box<str>>,
    pub abstract_name: Option<Box<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpAddress {
    pub host: Box<str>,
    pub port: u16,
    pub family: Option<Box<str>>,
}

/// Parse a D-Bus address string: one or more `transport:key=value,...`
/// segments separated by `;`. An empty string yields an empty list.
pub fn parse(addresses: &str) -> Result<Vec<Address>> {
    addresses
        .split(';')
        .filter(|segment| !segment.is_empty())
        .map(parse_one)
        .collect()
}

fn parse_one(segment: &str) -> Result<Address> {
    let (transport, rest) = segment.split_once(':').ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
    let params = parse_params(rest)?;

    match transport {
        "unix" => Ok(Address::Unix(UnixAddress {
            path: params.get("path").cloned(),
            abstract_name: params.get("abstract").cloned(),
        })),
        "tcp" => {
            let host = params
                .get("host")
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
            let port = params
                .get("port")
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?
                .parse::<u16>()
                .map_err(|_| Error::new(ErrorKind::InvalidAddress))?;
            Ok(Address::Tcp(TcpAddress {
                host,
                port,
                family: params.get("family").cloned(),
            }))
        }
        "autolaunch" => Ok(Address::Autolaunch {
            scope: params.get("scope").cloned(),
        }),
        _ => Err(Error::new(ErrorKind::InvalidAddress)),
    }
}

fn parse_params(rest: &str) -> Result<BTreeMap<&str, Box<str>>> {
    let mut params = BTreeMap::new();
    if rest.is_empty() {
        return Ok(params);
    }
    for pair in rest.split(',') {
        let (key, value) = pair.split_once('=').ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
        params.insert(key, unescape(value).into());
    }
    Ok(params)
}

/// Undo the `%XX` percent-escaping the D-Bus address grammar uses for
/// characters outside its unreserved set.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        let addresses = parse("unix:path=/run/dbus/system_bus_socket").unwrap();
        assert_eq!(
            addresses,
            vec![Address::Unix(UnixAddress {
                path: Some("/run/dbus/system_bus_socket".into()),
                abstract_name: None,
            })]
        );
    }

    #[test]
    fn parses_tcp_with_family() {
        let addresses = parse("tcp:host=127.0.0.1,port=1234,family=ipv4").unwrap();
        assert_eq!(
            addresses,
            vec![Address::Tcp(TcpAddress {
                host: "127.0.0.1".into(),
                port: 1234,
                family: Some("ipv4".into()),
            })]
        );
    }

    #[test]
    fn parses_alternatives_list() {
        let addresses = parse("unix:path=/a;unix:abstract=/b").unwrap();
        assert_eq!(addresses.len(), 2);
    }

    #[test]
    fn parses_autolaunch() {
        let addresses = parse("autolaunch:").unwrap();
        assert_eq!(addresses, vec![Address::Autolaunch { scope: None }]);
    }

    #[test]
    fn rejects_missing_transport() {
        assert!(parse("garbage").is_err());
    }

    #[test]
    fn unescapes_percent_encoding() {
        let addresses = parse("unix:path=/tmp/needs%20escape").unwrap();
        match &addresses[0] {
            Address::Unix(unix) => assert_eq!(unix.path.as_deref(), Some("/tmp/needs escape")),
            _ => panic!("expected unix address"),
        }
    }
}
