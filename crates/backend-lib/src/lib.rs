//! Core library for the WatchSync synchronized-viewing server.
//!
//! Clients connect over a WebSocket, authorize into a durable identity, and
//! gather in rooms where the host's playback state is mirrored to every
//! viewer. Everything lives in memory; a restart drops all state.

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod metrics;
pub mod room;
pub mod session;
pub mod ws_router;

use tokio::sync::Mutex;

use crate::config::Settings;
use crate::connection::ConnectionRegistry;
use crate::room::RoomStore;
use crate::session::SessionStore;

/// Session and room stores, guarded together by one lock. Read loops and the
/// reaper take it before touching either store and release it before any
/// outbound write.
#[derive(Debug, Default)]
pub struct CoreState {
    pub sessions: SessionStore,
    pub rooms: RoomStore,
}

/// Application state shared across all connections and the reaper.
pub struct AppState {
    pub core: Mutex<CoreState>,
    pub registry: ConnectionRegistry,
    pub settings: Settings,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            core: Mutex::new(CoreState::default()),
            registry: ConnectionRegistry::default(),
            settings,
        }
    }
}
