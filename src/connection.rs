//! Connection lifecycle tracking.
//!
//! A connection exists from the moment the WebSocket handshake completes
//! until the transport closes it. It only ever moves forward: a client that
//! reconnects gets a brand new `Connection`.

use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handshake done, messages may arrive.
    Open,
    /// Terminal.
    Closed,
}

/// A single accepted WebSocket session.
#[derive(Debug)]
pub struct Connection {
    /// Remote address of the client.
    peer: SocketAddr,
    /// Current connection state.
    state: ConnState,
}

impl Connection {
    /// Create a new connection in the open state.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: ConnState::Open,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&mut self) -> bool {
        match self.state {
            ConnState::Open => {
                self.state = ConnState::Closed;
                true
            }
            ConnState::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_new_connection_is_open() {
        let conn = Connection::new(peer());
        assert!(conn.is_open());
        assert_eq!(conn.state, ConnState::Open);
        assert_eq!(conn.peer(), peer());
    }

    #[test]
    fn test_close_transitions_once() {
        let mut conn = Connection::new(peer());
        assert!(conn.close());
        assert_eq!(conn.state, ConnState::Closed);
        assert!(!conn.close());
        assert!(!conn.is_open());
    }
}
