//! A synchronous, line-oriented SASL handshake state machine.
//!
//! Entirely sans-IO: callers feed it received bytes and drain bytes to
//! send, matching the rest of this crate's transport-agnostic design.
//! Supports the `EXTERNAL` and `DBUS_COOKIE_SHA1` mechanisms, with
//! automatic fallback to the next candidate mechanism on `REJECTED`.

use crate::error::{Error, ErrorKind, Result};

const MAX_LINE: usize = 16 * 1024;
const DEFAULT_COOKIE_CONTEXT: &str = "org_freedesktop_general";

/// A SASL authentication mechanism a client can offer.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `EXTERNAL`, authenticating as the given hex-encoded uid.
    External(Box<str>),
    /// `DBUS_COOKIE_SHA1`, authenticating as the given hex-encoded
    /// username and proving knowledge of a cookie shared with the server
    /// via `~/.dbus-keyrings`.
    CookieSha1 { username_hex: Box<str> },
}

impl Auth {
    /// `EXTERNAL` using the local process's uid (`libc::getuid()`).
    #[cfg(feature = "libc")]
    pub fn external_from_uid() -> Result<Self> {
        // SAFETY: `getuid` has no preconditions and never fails.
        let uid = unsafe { libc::getuid() };
        Ok(Self::external_from_u32_ascii_hex(uid as u32))
    }

    pub fn external_from_u32_ascii_hex(uid: u32) -> Self {
        Auth::External(crate::hex::hex_encode(uid.to_string().as_bytes()).into_boxed_str())
    }

    /// `DBUS_COOKIE_SHA1` for `username`, reading cookies from
    /// `~/.dbus-keyrings/org_freedesktop_general` as the server's
    /// challenge directs.
    pub fn cookie_sha1(username: &str) -> Self {
        Auth::CookieSha1 {
            username_hex: crate::hex::hex_encode(username.as_bytes()).into_boxed_str(),
        }
    }

    fn mechanism_name(&self) -> &'static str {
        match self {
            Auth::External(_) => "EXTERNAL",
            Auth::CookieSha1 { .. } => "DBUS_COOKIE_SHA1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStage {
    AwaitOk,
    AwaitCookieChallenge,
    AwaitBegin,
}

/// Client-side half of the handshake. Tries each offered [`Auth`] in
/// order, advancing to the next one every time the server answers
/// `REJECTED`; exhausting the list fails the handshake, per the
/// authentication state machine's "exhaustion of mechanisms is a fatal
/// connection error."
pub struct ClientHandshake {
    mechanisms: Vec<Auth>,
    next_mechanism: usize,
    stage: ClientStage,
    out: Vec<u8>,
    guid: Option<Box<str>>,
    done: bool,
}

impl ClientHandshake {
    /// Authenticate with a single mechanism.
    pub fn new(auth: &Auth) -> Self {
        Self::with_mechanisms(core::slice::from_ref(auth))
    }

    /// Authenticate, trying `mechanisms` in order on `REJECTED`.
    pub fn with_mechanisms(mechanisms: &[Auth]) -> Self {
        assert!(!mechanisms.is_empty(), "at least one SASL mechanism is required");
        let mut handshake = Self {
            mechanisms: mechanisms.to_vec(),
            next_mechanism: 1,
            stage: ClientStage::AwaitOk,
            out: vec![0],
            guid: None,
            done: false,
        };
        handshake.send_auth(&mechanisms[0].clone());
        handshake
    }

    fn send_auth(&mut self, auth: &Auth) {
        match auth {
            Auth::External(hex) => {
                self.out.extend_from_slice(b"AUTH EXTERNAL ");
                self.out.extend_from_slice(hex.as_bytes());
                self.out.extend_from_slice(b"\r\n");
                self.stage = ClientStage::AwaitOk;
            }
            Auth::CookieSha1 { username_hex } => {
                self.out.extend_from_slice(b"AUTH DBUS_COOKIE_SHA1 ");
                self.out.extend_from_slice(username_hex.as_bytes());
                self.out.extend_from_slice(b"\r\n");
                self.stage = ClientStage::AwaitCookieChallenge;
            }
        }
    }

    /// Send `CANCEL` for the mechanism in flight and move on to the next
    /// candidate, or fail if there is none left.
    fn advance_mechanism(&mut self) -> Result<()> {
        if self.next_mechanism >= self.mechanisms.len() {
            return Err(Error::new(ErrorKind::InvalidSaslState));
        }
        let auth = self.mechanisms[self.next_mechanism].clone();
        self.next_mechanism += 1;
        tracing::debug!(mechanism = auth.mechanism_name(), "retrying SASL with next mechanism");
        self.send_auth(&auth);
        Ok(())
    }

    /// Bytes that should be sent to the server; drains the internal queue.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.out)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Feed a complete `\r\n`-terminated line received from the server.
    pub fn receive_line(&mut self, line: &[u8]) -> Result<()> {
        if line.len() > MAX_LINE {
            return Err(Error::new(ErrorKind::InvalidSasl));
        }
        let text = core::str::from_utf8(line).map_err(|_| Error::new(ErrorKind::InvalidSasl))?;

        match self.stage {
            ClientStage::AwaitOk => {
                if let Some(guid) = text.strip_prefix("OK ") {
                    self.guid = Some(guid.trim().into());
                    self.out.extend_from_slice(b"BEGIN\r\n");
                    self.stage = ClientStage::AwaitBegin;
                    self.done = true;
                    Ok(())
                } else if text.starts_with("REJECTED") {
                    self.advance_mechanism()
                } else if text.starts_with("DATA") || text.starts_with("ERROR") {
                    self.out.extend_from_slice(b"CANCEL\r\n");
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::InvalidSaslResponse))
                }
            }
            ClientStage::AwaitCookieChallenge => {
                if let Some(hex_challenge) = text.strip_prefix("DATA ") {
                    self.respond_to_cookie_challenge(hex_challenge.trim())
                } else if text.starts_with("REJECTED") {
                    self.advance_mechanism()
                } else if text.starts_with("ERROR") {
                    self.out.extend_from_slice(b"CANCEL\r\n");
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::InvalidSaslResponse))
                }
            }
            ClientStage::AwaitBegin => Ok(()),
        }
    }

    /// Answer a `DBUS_COOKIE_SHA1` challenge: `hex_challenge` decodes to
    /// `"<context> <cookie_id> <server_challenge>"`. Looks the cookie up
    /// in the named keyring context, picks a fresh client challenge, and
    /// replies with `sha1("{server_challenge}:{client_challenge}:{cookie}")`.
    fn respond_to_cookie_challenge(&mut self, hex_challenge: &str) -> Result<()> {
        let decoded = crate::hex::hex_decode(hex_challenge)?;
        let decoded = core::str::from_utf8(&decoded).map_err(|_| Error::new(ErrorKind::InvalidSaslResponse))?;
        let mut parts = decoded.splitn(3, ' ');
        let context = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSaslResponse))?;
        let cookie_id = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSaslResponse))?;
        let server_challenge = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSaslResponse))?;

        let cookie = read_cookie(context, cookie_id)?;
        let client_challenge = random_challenge();

        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(server_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(client_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(cookie.as_bytes());
        let digest = crate::hex::hex_encode(&hasher.finalize());

        let response = format!("{client_challenge} {digest}");
        self.out.extend_from_slice(b"DATA ");
        self.out.extend_from_slice(crate::hex::hex_encode(response.as_bytes()).as_bytes());
        self.out.extend_from_slice(b"\r\n");
        self.stage = ClientStage::AwaitOk;
        Ok(())
    }
}

/// Look up `cookie_id` in `~/.dbus-keyrings/<context>`. Each line is
/// `"<id> <creation-time> <cookie>"`, whitespace-separated.
fn read_cookie(context: &str, cookie_id: &str) -> Result<String> {
    let home = std::env::var("HOME").map_err(|_| Error::new(ErrorKind::InvalidSasl))?;
    let path = std::path::Path::new(&home).join(".dbus-keyrings").join(context);
    let contents = std::fs::read_to_string(&path).map_err(|_| Error::new(ErrorKind::InvalidSasl))?;
    contents
        .lines()
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let _creation_time = fields.next()?;
            let cookie = fields.next()?;
            (id == cookie_id).then(|| cookie.to_owned())
        })
        .ok_or_else(|| Error::new(ErrorKind::InvalidSasl))
}

fn random_challenge() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    crate::hex::hex_encode(&bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStage {
    AwaitAuth,
    Authenticated,
}

/// Server-side half of the handshake, for one accepted remote.
pub struct ServerHandshake {
    stage: ServerStage,
    out: Vec<u8>,
    guid: Box<str>,
    authenticated_uid: Option<Box<str>>,
}

impl ServerHandshake {
    pub fn new(guid: impl Into<Box<str>>) -> Self {
        Self {
            stage: ServerStage::AwaitAuth,
            out: Vec::new(),
            guid: guid.into(),
            authenticated_uid: None,
        }
    }

    pub fn take_outgoing(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.out)
    }

    pub fn is_authenticated(&self) -> bool {
        self.stage == ServerStage::Authenticated
    }

    pub fn authenticated_uid(&self) -> Option<&str> {
        self.authenticated_uid.as_deref()
    }

    /// The leading NUL byte the client sends before the first line.
    pub fn consume_leading_nul(bytes: &mut &[u8]) -> bool {
        if bytes.first() == Some(&0) {
            *bytes = &bytes[1..];
            true
        } else {
            false
        }
    }

    pub fn receive_line(&mut self, line: &[u8]) -> Result<()> {
        if line.len() > MAX_LINE {
            return Err(Error::new(ErrorKind::InvalidSasl));
        }
        let text = core::str::from_utf8(line).map_err(|_| Error::new(ErrorKind::InvalidSasl))?;

        match self.stage {
            ServerStage::AwaitAuth => {
                if let Some(rest) = text.strip_prefix("AUTH EXTERNAL ") {
                    self.authenticated_uid = Some(rest.trim().into());
                    self.out.extend_from_slice(b"OK ");
                    self.out.extend_from_slice(self.guid.as_bytes());
                    self.out.extend_from_slice(b"\r\n");
                    Ok(())
                } else if text.trim() == "BEGIN" {
                    if self.authenticated_uid.is_some() {
                        self.stage = ServerStage::Authenticated;
                        Ok(())
                    } else {
                        Err(Error::new(ErrorKind::InvalidSaslState))
                    }
                } else {
                    self.out.extend_from_slice(b"REJECTED EXTERNAL\r\n");
                    Ok(())
                }
            }
            ServerStage::Authenticated => Ok(()),
        }
    }
}

/// Split `bytes` into `\r\n`-terminated lines, returning the lines found
/// and the number of bytes consumed (always a prefix ending after the
/// last terminator).
pub fn split_lines(bytes: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0;
    let mut rest = bytes;
    while let Some(pos) = rest.windows(2).position(|w| w == b"\r\n") {
        lines.push(&rest[..pos]);
        consumed += pos + 2;
        rest = &rest[pos + 2..];
    }
    (lines, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_handshake_happy_path() {
        let auth = Auth::External("31303030".into());
        let mut client = ClientHandshake::new(&auth);
        let first = client.take_outgoing();
        assert!(first.starts_with(b"\0AUTH EXTERNAL "));

        client.receive_line(b"OK 1234deadbeef").unwrap();
        assert!(client.is_done());
        assert_eq!(client.guid(), Some("1234deadbeef"));
        assert_eq!(client.take_outgoing(), b"BEGIN\r\n");
    }

    #[test]
    fn client_handshake_fails_when_only_mechanism_is_rejected() {
        let auth = Auth::External("00".into());
        let mut client = ClientHandshake::new(&auth);
        client.take_outgoing();
        assert!(client.receive_line(b"REJECTED EXTERNAL").is_err());
    }

    #[test]
    fn client_handshake_retries_next_mechanism_on_rejected() {
        let mechanisms = [
            Auth::CookieSha1 { username_hex: "31303030".into() },
            Auth::External("31303030".into()),
        ];
        let mut client = ClientHandshake::with_mechanisms(&mechanisms);
        let first = client.take_outgoing();
        assert!(first.starts_with(b"\0AUTH DBUS_COOKIE_SHA1 "));

        client.receive_line(b"REJECTED DBUS_COOKIE_SHA1").unwrap();
        assert!(!client.is_done());
        let second = client.take_outgoing();
        assert_eq!(second, b"AUTH EXTERNAL 31303030\r\n");

        client.receive_line(b"OK deadbeef").unwrap();
        assert!(client.is_done());
    }

    #[test]
    fn cookie_sha1_computes_response_from_keyring_file() {
        let dir = std::env::temp_dir().join(format!(
            "dbus-core-test-keyring-{:x}",
            std::process::id()
        ));
        let keyring = dir.join(".dbus-keyrings");
        std::fs::create_dir_all(&keyring).unwrap();
        std::fs::write(keyring.join("org_freedesktop_general"), "1 1700000000 cookiesecret\n").unwrap();

        let previous_home = std::env::var("HOME").ok();
        std::env::set_var("HOME", &dir);

        let auth = Auth::cookie_sha1("alice");
        let mut client = ClientHandshake::new(&auth);
        client.take_outgoing();

        let hex_challenge = crate::hex::hex_encode(b"org_freedesktop_general 1 servernonce");
        let line = format!("DATA {hex_challenge}");
        client.receive_line(line.as_bytes()).unwrap();

        let response = client.take_outgoing();
        assert!(response.starts_with(b"DATA "));
        let hex_response = core::str::from_utf8(&response[b"DATA ".len()..response.len() - 2]).unwrap();
        let decoded = crate::hex::hex_decode(hex_response).unwrap();
        let decoded = core::str::from_utf8(&decoded).unwrap();
        let mut parts = decoded.splitn(2, ' ');
        let client_challenge = parts.next().unwrap();
        let digest = parts.next().unwrap();

        use sha1::{Digest as _, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(b"servernonce:");
        hasher.update(client_challenge.as_bytes());
        hasher.update(b":cookiesecret");
        let expected = crate::hex::hex_encode(&hasher.finalize());
        assert_eq!(digest, expected);

        match previous_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn server_handshake_happy_path() {
        let mut server = ServerHandshake::new("guid1234");
        let mut bytes: &[u8] = b"\0AUTH EXTERNAL 31303030\r\nBEGIN\r\n";
        ServerHandshake::consume_leading_nul(&mut bytes);
        let (lines, _) = split_lines(bytes);
        server.receive_line(lines[0]).unwrap();
        assert_eq!(server.take_outgoing(), b"OK guid1234\r\n");
        server.receive_line(lines[1]).unwrap();
        assert!(server.is_authenticated());
        assert_eq!(server.authenticated_uid(), Some("31303030"));
    }

    #[test]
    fn begin_without_auth_is_rejected() {
        let mut server = ServerHandshake::new("guid1234");
        assert!(server.receive_line(b"BEGIN").is_err());
    }
}
