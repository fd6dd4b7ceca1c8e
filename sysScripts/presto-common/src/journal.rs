//! journald logging.
//!
//! Every tool logs through `tracing`. [`JournalLayer`] turns each event into
//! a journald native-protocol datagram tagged with the tool name, so
//! `journalctl -t presto-usb-install -n 20` works like `systemd-cat -t` did,
//! without forking a process per line.

use std::fmt;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

pub const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

/// Initialises logging for a binary.
/// journald always; a stderr layer too when `debug` (the `-d` flag) is set.
/// `RUST_LOG` overrides the level.
pub fn init_logging(identifier: &str, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = debug.then(|| {
        tfmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(JournalLayer::new(identifier))
        .with(console)
        .try_init();
}

/// A `tracing` layer writing to journald's native socket.
/// If the socket isn't there (containers, non-systemd hosts) events are dropped.
pub struct JournalLayer {
    socket: Option<UnixDatagram>,
    identifier: String,
}

impl JournalLayer {
    pub fn new(identifier: &str) -> Self {
        Self::connect(identifier, Path::new(JOURNAL_SOCKET))
    }

    pub fn connect(identifier: &str, socket_path: &Path) -> Self {
        let socket = UnixDatagram::unbound()
            .ok()
            .filter(|s| s.connect(socket_path).is_ok());
        Self {
            socket,
            identifier: identifier.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

impl<S: Subscriber> Layer<S> for JournalLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(socket) = &self.socket else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let payload = encode_entry(
            &self.identifier,
            meta.level(),
            meta.target(),
            &visitor.message,
            &visitor.fields,
        );
        if let Err(e) = send_entry(socket, &payload) {
            eprintln!("{}: journald write failed: {e}", self.identifier);
        }
    }
}

/// One datagram per entry. Entries above the socket's size limit fail with
/// `EMSGSIZE` (journald would need a memfd for those).
fn send_entry(socket: &UnixDatagram, payload: &[u8]) -> io::Result<()> {
    let sent = socket.send(payload)?;
    if sent < payload.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "journal entry truncated"));
    }
    Ok(())
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}

/// syslog priority for a tracing level (err=3, warning=4, info=6, debug=7).
pub fn priority(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    }
}

/// journald field names: uppercase ASCII, digits and `_`, no leading `_`.
pub fn sanitize_key(name: &str) -> String {
    let key: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    let key = key.trim_start_matches('_');
    if key.is_empty() {
        "FIELD".to_string()
    } else {
        key.to_string()
    }
}

/// Appends one field. Values containing a newline use the binary form:
/// `KEY\n<u64 LE length><value>\n`.
pub fn encode_field(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.extend_from_slice(key.as_bytes());
    if value.contains('\n') {
        buf.push(b'\n');
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    } else {
        buf.push(b'=');
    }
    buf.extend_from_slice(value.as_bytes());
    buf.push(b'\n');
}

pub fn encode_entry(
    identifier: &str,
    level: &Level,
    target: &str,
    message: &str,
    fields: &[(String, String)],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + message.len());
    encode_field(&mut buf, "PRIORITY", &priority(level).to_string());
    encode_field(&mut buf, "SYSLOG_IDENTIFIER", identifier);
    encode_field(&mut buf, "TARGET", target);
    encode_field(&mut buf, "MESSAGE", message);
    for (name, value) in fields {
        encode_field(&mut buf, &sanitize_key(name), value);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn simple_field_uses_equals_form() {
        let mut buf = Vec::new();
        encode_field(&mut buf, "MESSAGE", "hello");
        assert_eq!(buf, b"MESSAGE=hello\n");
    }

    #[test]
    fn multiline_field_uses_length_prefix() {
        let mut buf = Vec::new();
        encode_field(&mut buf, "MESSAGE", "a\nb");
        let mut expected = b"MESSAGE\n".to_vec();
        expected.extend_from_slice(&3u64.to_le_bytes());
        expected.extend_from_slice(b"a\nb\n");
        assert_eq!(buf, expected);
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("mount.point"), "MOUNT_POINT");
        assert_eq!(sanitize_key("_private"), "PRIVATE");
        assert_eq!(sanitize_key("___"), "FIELD");
        assert_eq!(sanitize_key("device"), "DEVICE");
    }

    #[test]
    fn levels_map_to_syslog_priorities() {
        assert_eq!(priority(&Level::ERROR), 3);
        assert_eq!(priority(&Level::WARN), 4);
        assert_eq!(priority(&Level::INFO), 6);
        assert_eq!(priority(&Level::DEBUG), 7);
        assert_eq!(priority(&Level::TRACE), 7);
    }

    #[test]
    fn entry_carries_identifier_and_extra_fields() {
        let fields = vec![("device".to_string(), "/dev/sda1".to_string())];
        let entry = encode_entry("presto-usb-install", &Level::WARN, "wizard", "retrying", &fields);
        let text = String::from_utf8(entry).unwrap();
        assert!(text.contains("PRIORITY=4\n"));
        assert!(text.contains("SYSLOG_IDENTIFIER=presto-usb-install\n"));
        assert!(text.contains("MESSAGE=retrying\n"));
        assert!(text.contains("DEVICE=/dev/sda1\n"));
    }

    #[test]
    fn missing_socket_is_not_an_error() {
        let layer = JournalLayer::connect("presto-test", Path::new("/nonexistent/journal.sock"));
        assert!(!layer.is_connected());
    }

    #[test]
    fn layer_sends_datagram_to_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        let layer = JournalLayer::connect("presto-test", &path);
        assert!(layer.is_connected());

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(drive = "sda", "drive checked");
        });

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("MESSAGE=drive checked\n"));
        assert!(text.contains("DRIVE=\"sda\"\n") || text.contains("DRIVE=sda\n"));
        assert!(text.contains("PRIORITY=6\n"));
    }

    #[test]
    fn oversized_entry_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.sock");
        let _receiver = UnixDatagram::bind(&path).unwrap();
        let sender = UnixDatagram::unbound().unwrap();
        sender.connect(&path).unwrap();

        assert!(send_entry(&sender, b"MESSAGE=ok\n").is_ok());
        let huge = vec![b'x'; 8 * 1024 * 1024];
        assert!(send_entry(&sender, &huge).is_err());
    }
}
