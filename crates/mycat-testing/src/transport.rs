//! In-memory transport and connector.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mycat_client::config::Protocol;
use mycat_client::topology::Connector;
use mycat_client::Error;
use mycat_codec::{CodecError, Packet, PacketTransport};
use mycat_protocol::ServerMessageType;
use parking_lot::Mutex;

use crate::server::{ER_QUERY_INTERRUPTED, MockServer, error_packet};

/// How often a hung read checks for a kill.
const KILL_POLL: Duration = Duration::from_millis(5);

/// One client connection to a [`MockServer`].
///
/// Every packet written is answered immediately; reads return the queued
/// answers. After a [`Reply::Hang`](crate::Reply::Hang) reads block until
/// the connection's thread is killed, then yield the interruption error.
#[derive(Debug)]
pub struct MockTransport {
    server: MockServer,
    inbox: VecDeque<Packet>,
    thread: Option<u64>,
    hung: bool,
    closed: bool,
}

impl MockTransport {
    /// Connect to `server`.
    #[must_use]
    pub fn new(server: MockServer) -> Self {
        Self {
            server,
            inbox: VecDeque::new(),
            thread: None,
            hung: false,
            closed: false,
        }
    }

    /// Server thread assigned by the handshake.
    #[must_use]
    pub fn thread(&self) -> Option<u64> {
        self.thread
    }
}

#[async_trait]
impl PacketTransport for MockTransport {
    async fn read_packet(&mut self) -> Result<Packet, CodecError> {
        if let Some(packet) = self.inbox.pop_front() {
            return Ok(packet);
        }
        if !self.hung || self.closed {
            return Err(CodecError::ConnectionClosed);
        }
        loop {
            if self.thread.is_some_and(|t| self.server.take_kill(t)) {
                self.hung = false;
                return Ok(error_packet(
                    ER_QUERY_INTERRUPTED,
                    "Query execution was interrupted",
                ));
            }
            tokio::time::sleep(KILL_POLL).await;
        }
    }

    async fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::ConnectionClosed);
        }
        let response = self.server.handle(&packet);
        if response.thread.is_some() {
            self.thread = response.thread;
        }
        self.hung = response.hang;
        self.inbox.extend(response.packets);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.closed = true;
        self.inbox.clear();
        Ok(())
    }
}

/// [`Connector`] handing out [`MockTransport`]s.
///
/// Hosts map to their own server when registered with
/// [`with_host`](Self::with_host); every other host reaches the default
/// server. Refused hosts fail with a transient IO error.
#[derive(Debug, Clone)]
pub struct MockConnector {
    default: MockServer,
    hosts: Arc<Mutex<HashMap<String, MockServer>>>,
    refused: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<Mutex<Vec<(String, u16)>>>,
}

impl MockConnector {
    /// Route every host to `server`.
    #[must_use]
    pub fn new(server: MockServer) -> Self {
        Self {
            default: server,
            hosts: Arc::default(),
            refused: Arc::default(),
            attempts: Arc::default(),
        }
    }

    /// Route `host` to `server`.
    #[must_use]
    pub fn with_host(self, host: impl Into<String>, server: MockServer) -> Self {
        self.hosts.lock().insert(host.into(), server);
        self
    }

    /// Refuse connections to `host`.
    pub fn refuse(&self, host: impl Into<String>) {
        self.refused.lock().insert(host.into());
    }

    /// Accept connections to `host` again.
    pub fn accept(&self, host: &str) {
        self.refused.lock().remove(host);
    }

    /// Every `(host, port)` a connection was attempted to.
    #[must_use]
    pub fn attempts(&self) -> Vec<(String, u16)> {
        self.attempts.lock().clone()
    }

    /// The default server.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.default
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        _timeout: Option<Duration>,
    ) -> mycat_client::Result<Box<dyn PacketTransport>> {
        self.attempts.lock().push((host.to_string(), port));
        if !matches!(protocol, Protocol::Tcp | Protocol::Unix) {
            return Err(Error::NotSupported(format!(
                "protocol {protocol:?} is not available"
            )));
        }
        if self.refused.lock().contains(host) {
            tracing::debug!(host, port, "mock connection refused");
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{host}:{port} refused the connection"),
            )));
        }
        let server = self
            .hosts
            .lock()
            .get(host)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Ok(Box::new(MockTransport::new(server)))
    }
}

/// Whether `packet` is a server error.
#[must_use]
pub fn is_error(packet: &Packet) -> bool {
    packet.message_type == ServerMessageType::Error as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mycat_protocol::crud::StmtExecute;

    use super::*;
    use crate::server::Reply;

    #[tokio::test]
    async fn test_answers_are_queued() {
        let server = MockServer::new().on("SELECT", Reply::ints("n", [1, 2]));
        let mut transport = MockTransport::new(server);
        transport
            .write_packet(Packet::from_client(&StmtExecute::sql("SELECT n", vec![])))
            .await
            .unwrap();
        let mut kinds = Vec::new();
        while let Ok(packet) = transport.read_packet().await {
            kinds.push(packet.message_type);
        }
        // column, two rows, fetch done, execute ok
        assert_eq!(kinds, vec![12, 13, 13, 14, 17]);
    }

    #[tokio::test]
    async fn test_hung_read_ends_on_kill() {
        let server = MockServer::new().on("SELECT SLEEP", Reply::Hang);
        let mut transport = MockTransport::new(server.clone());
        transport.thread = Some(7);
        transport
            .write_packet(Packet::from_client(&StmtExecute::sql("SELECT SLEEP(60)", vec![])))
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), transport.read_packet())
                .await
                .is_err()
        );
        server.handle(&Packet::from_client(&StmtExecute::sql("KILL QUERY 7", vec![])));
        let packet = transport.read_packet().await.unwrap();
        assert!(is_error(&packet));
    }

    #[tokio::test]
    async fn test_refused_host() {
        let connector = MockConnector::new(MockServer::new());
        connector.refuse("db1");
        let refused = connector.connect("db1", 33060, Protocol::Tcp, None).await;
        assert!(matches!(refused, Err(e) if e.is_transient()));
        assert!(connector.connect("db2", 33060, Protocol::Tcp, None).await.is_ok());
        assert_eq!(connector.attempts().len(), 2);
    }
}
