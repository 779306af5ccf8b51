//! Connection event handlers.
//!
//! The server drives a `ConnectionHandler` through three events per
//! connection: `on_connect` once after the handshake, `on_message` for every
//! complete text or binary message in arrival order, and `on_disconnect`
//! once when the connection goes away for any reason.
//!
//! `AckHandler` is the production handler: it logs what arrived and answers
//! every message with [`ACKNOWLEDGEMENT`].

use std::borrow::Cow;
use tracing::info;

use crate::connection::Connection;

/// Reply sent for every inbound message, text or binary.
pub const ACKNOWLEDGEMENT: &str = "Received successfully!";

/// Callbacks invoked by the server for each connection.
///
/// Handlers are shared by every connection and may be called concurrently
/// for distinct connections, so they must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connect(&self, conn: &Connection);

    /// Handle one complete message. A returned string is sent back to the
    /// same connection as a text message before the next message is read.
    fn on_message(&self, conn: &Connection, payload: &[u8], is_binary: bool) -> Option<String>;

    fn on_disconnect(&self, conn: &Connection);
}

/// What arrived on a connection, as far as logging is concerned.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Text payload, decoded with U+FFFD substituted for invalid sequences.
    Text(Cow<'a, str>),
    /// Binary payload; only its length is reported.
    Binary { len: usize },
}

impl<'a> Inbound<'a> {
    /// Classify a payload. Never fails.
    pub fn decode(payload: &'a [u8], is_binary: bool) -> Self {
        if is_binary {
            Inbound::Binary { len: payload.len() }
        } else {
            Inbound::Text(String::from_utf8_lossy(payload))
        }
    }
}

/// Logs every event and acknowledges every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct AckHandler;

impl ConnectionHandler for AckHandler {
    fn on_connect(&self, conn: &Connection) {
        info!(peer = %conn.peer(), "Client connected");
    }

    fn on_message(&self, conn: &Connection, payload: &[u8], is_binary: bool) -> Option<String> {
        match Inbound::decode(payload, is_binary) {
            Inbound::Binary { len } => {
                info!(peer = %conn.peer(), bytes = len, "Received binary data");
            }
            Inbound::Text(text) => {
                info!(peer = %conn.peer(), text = %text, "Received text");
            }
        }
        Some(ACKNOWLEDGEMENT.to_string())
    }

    fn on_disconnect(&self, conn: &Connection) {
        info!(peer = %conn.peer(), "Client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a fmt subscriber writing into a buffer; return the lines.
    fn capture_logs(f: impl FnOnce()) -> Vec<String> {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn conn() -> Connection {
        Connection::new("127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(
            Inbound::decode(b"hello", false),
            Inbound::Text(Cow::Borrowed("hello"))
        );
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(Inbound::decode(b"", false), Inbound::Text(Cow::Borrowed("")));
        assert_eq!(Inbound::decode(b"", true), Inbound::Binary { len: 0 });
    }

    #[test]
    fn test_decode_binary_reports_length() {
        let payload = vec![0xABu8; 4096];
        assert_eq!(Inbound::decode(&payload, true), Inbound::Binary { len: 4096 });
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        match Inbound::decode(b"ok\xff\xfe!", false) {
            Inbound::Text(text) => assert_eq!(text, "ok\u{FFFD}\u{FFFD}!"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ack_for_every_message() {
        let handler = AckHandler;
        let conn = conn();
        handler.on_connect(&conn);
        for (payload, is_binary) in [
            (&b"hello"[..], false),
            (&b""[..], false),
            (&b"\x00\x01\x02"[..], true),
            (&b""[..], true),
            (&b"\xc3\x28"[..], false),
        ] {
            assert_eq!(
                handler.on_message(&conn, payload, is_binary).as_deref(),
                Some(ACKNOWLEDGEMENT)
            );
        }
        handler.on_disconnect(&conn);
    }

    #[test]
    fn test_binary_logs_length_only() {
        let conn = conn();
        let lines = capture_logs(|| {
            AckHandler.on_message(&conn, &[0x42u8; 1500], true);
            AckHandler.on_message(&conn, b"", true);
        });

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Received binary data"));
        assert!(lines[0].ends_with("bytes=1500"), "{}", lines[0]);
        assert!(lines[1].ends_with("bytes=0"), "{}", lines[1]);
        assert!(lines.iter().all(|line| !line.contains("BBBB")));
    }

    #[test]
    fn test_text_logs_decoded_content() {
        let conn = conn();
        let lines = capture_logs(|| {
            AckHandler.on_message(&conn, b"hello there", false);
            AckHandler.on_message(&conn, b"", false);
            AckHandler.on_message(&conn, b"ok\xff!", false);
        });

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.contains("Received text")));
        assert!(lines[0].ends_with("text=hello there"), "{}", lines[0]);
        assert!(lines[1].ends_with("text="), "{}", lines[1]);
        assert!(lines[2].ends_with("text=ok\u{FFFD}!"), "{}", lines[2]);
    }

    #[test]
    fn test_lifecycle_logs() {
        let conn = conn();
        let lines = capture_logs(|| {
            AckHandler.on_connect(&conn);
            AckHandler.on_disconnect(&conn);
        });

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Client connected"));
        assert!(lines[0].contains("peer=127.0.0.1:40000"));
        assert!(lines[1].contains("Client disconnected"));
    }
}
