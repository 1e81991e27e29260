//! Connection registry: private token to live channel.
//!
//! The registry only maps identities to channel handles; it never writes a
//! frame itself. Each handle feeds the dedicated writer task of one socket,
//! which serializes outbound frames for that connection.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::messages::ServerEnvelope;
use crate::session::PrivateToken;

/// Write half of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    addr: String,
    tx: mpsc::UnboundedSender<ServerEnvelope>,
}

impl ConnectionHandle {
    pub fn new(addr: impl Into<String>, tx: mpsc::UnboundedSender<ServerEnvelope>) -> Self {
        Self {
            addr: addr.into(),
            tx,
        }
    }

    /// Printable remote endpoint, for logging.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn send(&self, message: ServerEnvelope) -> Result<(), AppError> {
        self.tx.send(message).map_err(|_| AppError::ChannelClosed)
    }

    /// Whether two handles feed the same socket writer.
    pub fn same_channel(&self, other: &ConnectionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: DashMap<PrivateToken, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Registers a channel under a token. An existing slot is replaced; a
    /// reconnecting client supersedes its previous channel.
    pub fn register(&self, token: PrivateToken, handle: ConnectionHandle) {
        self.slots.insert(token, handle);
    }

    pub fn unregister(&self, token: &PrivateToken) -> Result<ConnectionHandle, AppError> {
        self.slots
            .remove(token)
            .map(|(_, handle)| handle)
            .ok_or(AppError::ConnectionNotFound)
    }

    pub fn get(&self, token: &PrivateToken) -> Option<ConnectionHandle> {
        self.slots.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new("127.0.0.1:4242", tx), rx)
    }

    #[test]
    fn register_then_get_and_unregister() {
        let registry = ConnectionRegistry::default();
        let token = PrivateToken::new("p1");
        let (first, _rx) = handle();

        registry.register(token.clone(), first.clone());
        let stored = registry.get(&token).unwrap();
        assert!(stored.same_channel(&first));

        registry.unregister(&token).unwrap();
        assert!(registry.get(&token).is_none());
    }

    #[test]
    fn reregistering_supersedes_the_previous_channel() {
        let registry = ConnectionRegistry::default();
        let token = PrivateToken::new("p1");
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register(token.clone(), first.clone());
        registry.register(token.clone(), second.clone());

        assert_eq!(registry.len(), 1);
        let stored = registry.get(&token).unwrap();
        assert!(stored.same_channel(&second));
        assert!(!stored.same_channel(&first));
    }

    #[test]
    fn unregister_fails_when_absent() {
        let registry = ConnectionRegistry::default();
        assert!(matches!(
            registry.unregister(&PrivateToken::new("missing")),
            Err(AppError::ConnectionNotFound)
        ));
    }

    #[test]
    fn send_reaches_the_receiver() {
        let (handle, mut rx) = handle();
        handle
            .send(crate::messages::ServerEnvelope::ok(
                crate::messages::ServerMessageKind::Pong,
                serde_json::Value::Null,
            ))
            .unwrap();
        let envelope = rx.try_recv().unwrap();
        assert!(envelope.is_ok());

        drop(rx);
        assert!(matches!(
            handle.send(crate::messages::ServerEnvelope::ok(
                crate::messages::ServerMessageKind::Pong,
                serde_json::Value::Null,
            )),
            Err(AppError::ChannelClosed)
        ));
    }
}
