//! Client identity and the session store.
//!
//! A client is addressed by two opaque tokens. The private token is the
//! durable identity the extension keeps secret and presents when it
//! reconnects; the public token is what peers in the same room see, and it
//! rotates on every authorization.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;
use crate::messages::ClientRecord;
use crate::room::RoomId;

/// Durable identity token. Never shown to other clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateToken(String);

impl PrivateToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PrivateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer-visible identity token, rotated on every successful authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicToken(String);

impl PublicToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PublicToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a client stands inside the room model. The wire represents this as
/// the `clientType` integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientRole {
    #[default]
    Inactive = 0,
    Host = 1,
    Viewer = 2,
}

impl Serialize for ClientRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ClientRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(ClientRole::Inactive),
            1 => Ok(ClientRole::Host),
            2 => Ok(ClientRole::Viewer),
            other => Err(de::Error::custom(format!("unknown client role {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    pub private_token: PrivateToken,
    pub public_token: PublicToken,
    pub name: String,
    pub image: String,
    pub email: String,
    pub role: ClientRole,
    pub room_id: Option<RoomId>,
    /// Monotonic stamp of the last inbound message; the reaper compares
    /// against it.
    pub last_seen: Instant,
}

impl Client {
    pub fn new(private_token: PrivateToken) -> Self {
        Self {
            private_token,
            public_token: PublicToken::default(),
            name: String::new(),
            image: String::new(),
            email: String::new(),
            role: ClientRole::Inactive,
            room_id: None,
            last_seen: Instant::now(),
        }
    }

    /// The peer-visible slice of this client.
    pub fn record(&self) -> ClientRecord {
        ClientRecord {
            name: self.name.clone(),
            image: self.image.clone(),
            public_token: self.public_token.clone(),
        }
    }

    pub fn clear_membership(&mut self) {
        self.role = ClientRole::Inactive;
        self.room_id = None;
    }
}

/// Registered clients, indexed by private token with a reverse index from
/// public token.
#[derive(Debug, Default)]
pub struct SessionStore {
    by_private: HashMap<PrivateToken, Client>,
    by_public: HashMap<PublicToken, PrivateToken>,
}

impl SessionStore {
    /// Inserts a client into both indexes. Replacing an entry under the same
    /// private token evicts its stale reverse mapping, so a rotated public
    /// token never leaves a dangling index entry behind.
    pub fn register(&mut self, client: Client) -> Result<(), AppError> {
        if client.private_token.is_empty() || client.public_token.is_empty() {
            return Err(AppError::MissingToken);
        }

        if let Some(previous) = self.by_private.get(&client.private_token) {
            self.by_public.remove(&previous.public_token);
        }

        self.by_public
            .insert(client.public_token.clone(), client.private_token.clone());
        self.by_private.insert(client.private_token.clone(), client);
        Ok(())
    }

    pub fn unregister(&mut self, token: &PrivateToken) -> Option<Client> {
        let client = self.by_private.remove(token)?;
        self.by_public.remove(&client.public_token);
        Some(client)
    }

    pub fn get(&self, token: &PrivateToken) -> Option<&Client> {
        self.by_private.get(token)
    }

    pub fn get_mut(&mut self, token: &PrivateToken) -> Option<&mut Client> {
        self.by_private.get_mut(token)
    }

    pub fn contains(&self, token: &PrivateToken) -> bool {
        self.by_private.contains_key(token)
    }

    pub fn resolve_public(&self, token: &PublicToken) -> Option<&PrivateToken> {
        self.by_public.get(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.by_private.values()
    }

    pub fn len(&self) -> usize {
        self.by_private.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_private.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(private: &str, public: &str) -> Client {
        let mut client = Client::new(PrivateToken::new(private));
        client.public_token = PublicToken::new(public);
        client
    }

    #[test]
    fn register_requires_both_tokens() {
        let mut store = SessionStore::default();
        assert!(store.register(Client::new(PrivateToken::new("p1"))).is_err());
        assert!(store
            .register(client("", ""))
            .is_err());
        assert!(store.register(client("p1", "q1")).is_ok());
    }

    #[test]
    fn indexes_agree_after_register_and_unregister() {
        let mut store = SessionStore::default();
        store.register(client("p1", "q1")).unwrap();

        assert!(store.contains(&PrivateToken::new("p1")));
        assert_eq!(
            store.resolve_public(&PublicToken::new("q1")),
            Some(&PrivateToken::new("p1"))
        );

        store.unregister(&PrivateToken::new("p1"));
        assert!(store.is_empty());
        assert!(store.resolve_public(&PublicToken::new("q1")).is_none());
    }

    #[test]
    fn replacing_an_entry_evicts_the_stale_public_mapping() {
        let mut store = SessionStore::default();
        store.register(client("p1", "q1")).unwrap();
        store.register(client("p1", "q2")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.resolve_public(&PublicToken::new("q1")).is_none());
        assert_eq!(
            store.resolve_public(&PublicToken::new("q2")),
            Some(&PrivateToken::new("p1"))
        );
    }

    #[test]
    fn role_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&ClientRole::Host).unwrap(), "1");
        let role: ClientRole = serde_json::from_str("2").unwrap();
        assert_eq!(role, ClientRole::Viewer);
        assert!(serde_json::from_str::<ClientRole>("7").is_err());
    }
}
