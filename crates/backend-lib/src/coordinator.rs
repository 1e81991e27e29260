//! Per-connection coordination.
//!
//! A `ClientSession` owns the state of one channel: the temporary identity
//! minted at upgrade time, the authorization gate, and handler dispatch.
//! Handlers return directed messages; delivery and the inactivity reaper
//! live here too, so no other module ever touches a channel.

use std::sync::Arc;
use std::time::Instant;

use ::metrics::counter;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::handlers;
use crate::messages::{ClientActionKind, ClientEnvelope, DirectedMessage};
use crate::metrics as keys;
use crate::session::{Client, PrivateToken, PublicToken};
use crate::{AppState, CoreState};

/// Mints a durable client identity: 36 printable characters from a
/// cryptographically random source. Collisions are left to probability.
pub fn mint_private_token() -> PrivateToken {
    PrivateToken::new(Uuid::new_v4().to_string())
}

pub fn mint_public_token() -> PublicToken {
    PublicToken::new(Uuid::new_v4().to_string())
}

/// Connection-scoped state for one client channel.
pub struct ClientSession {
    state: Arc<AppState>,
    /// Authoritative only until Authorize registers it into the store; its
    /// private token always names the connection's current identity.
    client: Client,
}

impl ClientSession {
    /// Mints a temporary identity and registers the channel under it.
    pub fn open(state: Arc<AppState>, handle: ConnectionHandle) -> Self {
        let token = mint_private_token();
        info!(addr = %handle.addr(), token = %token, "established connection");
        state.registry.register(token.clone(), handle);
        Self {
            state,
            client: Client::new(token),
        }
    }

    pub fn token(&self) -> &PrivateToken {
        &self.client.private_token
    }

    /// Processes one inbound envelope: gate, dispatch, delivery.
    pub async fn handle_envelope(&mut self, envelope: ClientEnvelope) {
        self.client.last_seen = Instant::now();

        let Some(kind) = ClientActionKind::parse(&envelope.action_type) else {
            debug!(
                token = %self.client.private_token,
                action = %envelope.action_type,
                "no handler for requested action"
            );
            return;
        };

        let state = Arc::clone(&self.state);
        let messages = {
            let mut core = state.core.lock().await;

            if let Some(registered) = core.sessions.get_mut(&self.client.private_token) {
                registered.last_seen = self.client.last_seen;
            } else if !matches!(
                kind,
                ClientActionKind::Authorize | ClientActionKind::Ping
            ) {
                debug!(
                    token = %self.client.private_token,
                    action = kind.as_str(),
                    "dropping request from unauthorized client"
                );
                counter!(keys::REQUEST_DROPPED).increment(1);
                return;
            }

            counter!(keys::REQUEST_HANDLED, "action" => kind.as_str()).increment(1);
            self.dispatch(&mut core, kind, &envelope.action)
        };

        deliver(&state.registry, messages);
    }

    fn dispatch(
        &mut self,
        core: &mut CoreState,
        kind: ClientActionKind,
        raw: &str,
    ) -> Vec<DirectedMessage> {
        match kind {
            ClientActionKind::Authorize => {
                handlers::authorize(core, &self.state.registry, &mut self.client, raw)
            }
            ClientActionKind::HostRoom => {
                handlers::host_room(core, &self.client.private_token, raw)
            }
            ClientActionKind::JoinRoom => {
                handlers::join_room(core, &self.client.private_token, raw)
            }
            ClientActionKind::DisconnectRoom => {
                handlers::disconnect_room(core, &self.client.private_token)
            }
            ClientActionKind::SendReflection => {
                handlers::reflect(core, &self.client.private_token, raw)
            }
            ClientActionKind::SendVideoDetails => {
                handlers::video_details(core, &self.client.private_token, raw)
            }
            ClientActionKind::Ping => handlers::ping(&self.client.private_token, raw),
        }
    }

    /// Releases this connection's registry slot. The slot is left alone when
    /// an Authorize rebind already pointed the token at a newer channel, and
    /// room membership is always left for the reaper so the client can
    /// resume its identity.
    pub fn close(&self, handle: &ConnectionHandle) {
        let token = &self.client.private_token;
        match self.state.registry.get(token) {
            Some(current) if current.same_channel(handle) => {
                if let Err(error) = self.state.registry.unregister(token) {
                    debug!(token = %token, %error, "connection slot already released");
                }
            }
            _ => debug!(token = %token, "connection slot superseded, leaving it in place"),
        }
        info!(addr = %handle.addr(), token = %token, "connection closed");
    }
}

/// Writes each directed message to the channel currently registered for its
/// recipient. Missing or dead channels are logged and skipped.
pub fn deliver(registry: &ConnectionRegistry, messages: Vec<DirectedMessage>) {
    for directed in messages {
        match registry.get(&directed.to) {
            Some(handle) => {
                if let Err(error) = handle.send(directed.message) {
                    warn!(token = %directed.to, %error, "failed to write outbound message");
                }
            }
            None => debug!(token = %directed.to, "no live connection for outbound message"),
        }
    }
}

/// Runs the inactivity sweep forever. One instance per process.
pub async fn run_reaper(state: Arc<AppState>) {
    let mut ticker = interval(state.settings.session.cleanup_interval());
    loop {
        ticker.tick().await;
        sweep_inactive(&state).await;
    }
}

/// Evicts every client whose last inbound message is older than the
/// configured threshold, cascading room disconnections as if they had asked
/// for one. Channels that died without a clean disconnect are exactly what
/// this backstops, so undeliverable messages are fine.
pub async fn sweep_inactive(state: &AppState) {
    let threshold = state.settings.session.inactivity_threshold();
    let now = Instant::now();

    let mut messages = Vec::new();
    let mut evicted = 0u64;
    {
        let mut core = state.core.lock().await;
        let expired: Vec<PrivateToken> = core
            .sessions
            .iter()
            .filter(|client| now.duration_since(client.last_seen) >= threshold)
            .map(|client| client.private_token.clone())
            .collect();

        for token in expired {
            // A host eviction may have already swept this client away.
            if !core.sessions.contains(&token) {
                continue;
            }
            info!(token = %token, "removing inactive client");
            messages.extend(handlers::disconnect_from_room(&mut core, &token));
            core.sessions.unregister(&token);
            evicted += 1;
        }
    }

    if evicted > 0 {
        counter!(keys::CLIENT_REAPED).increment(evicted);
    }
    deliver(&state.registry, messages);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_printable_and_distinct() {
        let first = mint_private_token();
        let second = mint_private_token();

        assert_eq!(first.as_str().len(), 36);
        assert_ne!(first, second);
        assert!(first.as_str().chars().all(|c| c.is_ascii_graphic()));

        let public = mint_public_token();
        assert_eq!(public.as_str().len(), 36);
    }
}
