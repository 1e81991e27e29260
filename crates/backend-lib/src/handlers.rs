//! Request handlers for the client protocol.
//!
//! Handlers are pure over the stores: each one takes the locked core state
//! and returns the directed messages the caller should deliver. All socket
//! I/O stays in the coordinator, which keeps every handler testable without
//! a live channel.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{info, warn};

use crate::connection::ConnectionRegistry;
use crate::coordinator::mint_public_token;
use crate::messages::{
    AuthorizeRequest, AuthorizeResponse, DirectedMessage, JoinRoomRequest, JoinRoomResponse,
    PingPong, RoomRecord, RoomReflection, RoomSettings, ServerEnvelope, ServerMessageKind,
    VideoDetails, ERR_BAD_JSON, ERR_FULL_ROOM, ERR_INTERNAL, ERR_LONG_ROOM_NAME, ERR_NO_ROOM,
    ERR_NOT_HOST, ERR_SHORT_ROOM_NAME,
};
use crate::room::{Room, RoomId};
use crate::session::{Client, ClientRole, PrivateToken};
use crate::CoreState;

const ROOM_NAME_MIN: usize = 3;
const ROOM_NAME_MAX: usize = 50;

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

fn reply(to: &PrivateToken, message: ServerEnvelope) -> Vec<DirectedMessage> {
    vec![DirectedMessage::new(to.clone(), message)]
}

/// Binds the connection to an identity. A known `privateToken` adopts the
/// stored state and moves the live channel from the caller's temporary slot
/// to the durable one; anything else seeds a fresh profile under the
/// caller's current token. The reply is addressed to the *resulting* token,
/// which is how the extension learns its durable identity.
pub fn authorize(
    core: &mut CoreState,
    registry: &ConnectionRegistry,
    client: &mut Client,
    raw: &str,
) -> Vec<DirectedMessage> {
    let request: AuthorizeRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(error) => {
            warn!(token = %client.private_token, %error, "authorize request with bad json");
            return reply(
                &client.private_token,
                ServerEnvelope::error(ServerMessageKind::Authorize, ERR_BAD_JSON),
            );
        }
    };

    let caller = client.private_token.clone();
    let existing = if request.private_token.is_empty() {
        None
    } else {
        core.sessions.get(&request.private_token).cloned()
    };
    let authorized = existing.is_some();
    info!(token = %caller, authorized, "authorizing client");

    let mut messages = Vec::new();

    let mut state = match existing {
        Some(existing) => existing,
        None => {
            // The submitted token did not resolve; the caller keeps its
            // current token with a fresh profile. An identity that was
            // already inside a room leaves it first.
            if core.sessions.contains(&caller) {
                messages.extend(disconnect_from_room(core, &caller));
            }
            let mut fresh = Client::new(caller.clone());
            fresh.name = request.name;
            fresh.image = request.image;
            fresh
        }
    };
    state.public_token = mint_public_token();
    state.last_seen = Instant::now();

    if authorized && state.private_token != caller {
        // Move the live channel from the temporary slot to the adopted one.
        let Some(channel) = registry.get(&caller) else {
            warn!(token = %caller, "no live channel to rebind during authorize");
            return reply(
                &caller,
                ServerEnvelope::error(ServerMessageKind::Authorize, ERR_INTERNAL),
            );
        };
        registry.register(state.private_token.clone(), channel);
        if let Err(error) = registry.unregister(&caller) {
            warn!(token = %caller, %error, "failed to release temporary slot");
        }

        // The temporary identity is discarded; detach it from any room it
        // was still holding before it vanishes from the store.
        if core.sessions.contains(&caller) {
            messages.extend(disconnect_from_room(core, &caller));
            core.sessions.unregister(&caller);
        }
    }

    *client = state.clone();
    if let Err(error) = core.sessions.register(state) {
        warn!(token = %client.private_token, %error, "failed to register client session");
        return reply(
            &client.private_token,
            ServerEnvelope::error(ServerMessageKind::Authorize, ERR_INTERNAL),
        );
    }

    let response = AuthorizeResponse {
        name: client.name.clone(),
        image: client.image.clone(),
        private_token: client.private_token.clone(),
        public_token: client.public_token.clone(),
    };
    messages.push(DirectedMessage::new(
        client.private_token.clone(),
        ServerEnvelope::ok_or_internal(ServerMessageKind::Authorize, &response),
    ));

    if authorized {
        let token = client.private_token.clone();
        messages.extend(resume_membership(core, &token));
    }

    messages
}

/// A reconnecting client that was still inside a live room is put back into
/// its seat: the host reclaims the room, a viewer is re-added, and the usual
/// join replay (video details, roster update) runs.
fn resume_membership(core: &mut CoreState, token: &PrivateToken) -> Vec<DirectedMessage> {
    let Some(client) = core.sessions.get(token) else {
        return Vec::new();
    };
    if client.role == ClientRole::Inactive {
        return Vec::new();
    }
    let Some(room_id) = client.room_id.clone() else {
        return Vec::new();
    };
    if !core.rooms.contains(&room_id) {
        return Vec::new();
    }

    info!(token = %token, room = %room_id, "resuming room membership");
    join_room_by_id(core, token, &room_id)
}

/// Creates a room with the caller as host. A caller that already belongs to
/// a room leaves it first, and those disconnect messages precede the
/// `HostRoom` reply.
pub fn host_room(core: &mut CoreState, token: &PrivateToken, raw: &str) -> Vec<DirectedMessage> {
    let settings: RoomSettings = match serde_json::from_str(raw) {
        Ok(settings) => settings,
        Err(error) => {
            warn!(token = %token, %error, "host room request with bad json");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::HostRoom, ERR_BAD_JSON),
            );
        }
    };

    let name = settings.name.trim().to_string();
    let length = name.chars().count();
    if length < ROOM_NAME_MIN {
        warn!(token = %token, name = %name, "room name too short");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::HostRoom, ERR_SHORT_ROOM_NAME),
        );
    }
    if length > ROOM_NAME_MAX {
        warn!(token = %token, "room name too long");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::HostRoom, ERR_LONG_ROOM_NAME),
        );
    }

    let mut messages = Vec::new();
    if core
        .sessions
        .get(token)
        .is_some_and(|client| client.room_id.is_some())
    {
        messages.extend(disconnect_from_room(core, token));
    }

    let room_id = core.rooms.mint_id();
    let room = Room::new(
        room_id.clone(),
        token.clone(),
        RoomSettings { name },
        unix_millis(),
    );
    core.rooms.register(room);

    if let Some(client) = core.sessions.get_mut(token) {
        client.role = ClientRole::Host;
        client.room_id = Some(room_id.clone());
    }
    info!(token = %token, room = %room_id, "created room");

    match room_record(core, &room_id) {
        Some(record) => messages.push(DirectedMessage::new(
            token.clone(),
            ServerEnvelope::ok_or_internal(ServerMessageKind::HostRoom, &record),
        )),
        None => messages.push(DirectedMessage::new(
            token.clone(),
            ServerEnvelope::error(ServerMessageKind::HostRoom, ERR_INTERNAL),
        )),
    }

    messages
}

pub fn join_room(core: &mut CoreState, token: &PrivateToken, raw: &str) -> Vec<DirectedMessage> {
    let request: JoinRoomRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(error) => {
            warn!(token = %token, %error, "join room request with bad json");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::JoinRoom, ERR_BAD_JSON),
            );
        }
    };

    join_room_by_id(core, token, &request.room_id)
}

fn join_room_by_id(
    core: &mut CoreState,
    token: &PrivateToken,
    room_id: &RoomId,
) -> Vec<DirectedMessage> {
    let Some(role) = core.sessions.get(token).map(|client| client.role) else {
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::JoinRoom, ERR_INTERNAL),
        );
    };

    {
        let Some(room) = core.rooms.get_mut(room_id) else {
            info!(token = %token, room = %room_id, "no room found");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::JoinRoom, ERR_NO_ROOM),
            );
        };
        if room.is_full() {
            info!(token = %token, room = %room_id, "room is full");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::JoinRoom, ERR_FULL_ROOM),
            );
        }

        match role {
            // A returning host reclaims its seat.
            ClientRole::Host => room.host = token.clone(),
            // A returning viewer is deduplicated by private token before
            // being re-appended.
            ClientRole::Viewer => room.remove_viewer(token),
            ClientRole::Inactive => {}
        }
        if role != ClientRole::Host {
            room.add_viewer(token.clone());
        }
    }

    let joined_role = if role == ClientRole::Host {
        ClientRole::Host
    } else {
        ClientRole::Viewer
    };
    if let Some(client) = core.sessions.get_mut(token) {
        client.role = joined_role;
        client.room_id = Some(room_id.clone());
    }

    let Some(room) = core.rooms.get(room_id) else {
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::JoinRoom, ERR_INTERNAL),
        );
    };

    let mut messages = Vec::new();
    let response = JoinRoomResponse {
        room: room.record(&core.sessions),
        client_type: joined_role,
    };
    messages.push(DirectedMessage::new(
        token.clone(),
        ServerEnvelope::ok_or_internal(ServerMessageKind::JoinRoom, &response),
    ));

    // A joiner sees the room's video details before the roster update.
    if room.video_details.is_complete() {
        messages.push(DirectedMessage::new(
            token.clone(),
            ServerEnvelope::ok_or_internal(
                ServerMessageKind::ReflectVideoDetails,
                &room.video_details,
            ),
        ));
    }

    messages.extend(update_room_members(core, room_id));
    messages
}

pub fn disconnect_room(core: &mut CoreState, token: &PrivateToken) -> Vec<DirectedMessage> {
    disconnect_from_room(core, token)
}

/// Detaches a client from its room.
///
/// A viewer is removed from the roster, the remaining members get the new
/// roster, and the viewer gets its `DisconnectRoom` confirmation. A host
/// tears the whole room down: the host sees one final roster snapshot, every
/// viewer is disconnected in order, the room is unregistered, and the host
/// gets its own confirmation last. A client with no room produces nothing.
pub fn disconnect_from_room(core: &mut CoreState, token: &PrivateToken) -> Vec<DirectedMessage> {
    let Some(client) = core.sessions.get(token) else {
        return Vec::new();
    };
    let role = client.role;
    let Some(room_id) = client.room_id.clone() else {
        return Vec::new();
    };

    if !core.rooms.contains(&room_id) {
        warn!(token = %token, room = %room_id, "clearing membership of a vanished room");
        if let Some(client) = core.sessions.get_mut(token) {
            client.clear_membership();
        }
        return Vec::new();
    }

    let mut messages = Vec::new();
    match role {
        ClientRole::Host => {
            let (snapshot, viewers) = match core.rooms.get(&room_id) {
                Some(room) => (room.record(&core.sessions), room.viewers.clone()),
                None => return messages,
            };
            messages.push(DirectedMessage::new(
                token.clone(),
                ServerEnvelope::ok_or_internal(ServerMessageKind::UpdateRoom, &snapshot),
            ));
            for viewer in viewers {
                if let Some(client) = core.sessions.get_mut(&viewer) {
                    client.clear_membership();
                }
                messages.push(DirectedMessage::new(
                    viewer,
                    ServerEnvelope::ok(ServerMessageKind::DisconnectRoom, Value::Null),
                ));
            }
            core.rooms.unregister(&room_id);
            info!(token = %token, room = %room_id, "room closed by host disconnect");
        }
        ClientRole::Viewer => {
            if let Some(room) = core.rooms.get_mut(&room_id) {
                room.remove_viewer(token);
            }
            messages.extend(update_room_members(core, &room_id));
            info!(token = %token, room = %room_id, "viewer left room");
        }
        ClientRole::Inactive => {}
    }

    if let Some(client) = core.sessions.get_mut(token) {
        client.clear_membership();
    }
    messages.push(DirectedMessage::new(
        token.clone(),
        ServerEnvelope::ok(ServerMessageKind::DisconnectRoom, Value::Null),
    ));

    messages
}

/// Forwards the host's playback snapshot to every viewer of its room. The
/// host itself never receives the echo.
pub fn reflect(core: &CoreState, token: &PrivateToken, raw: &str) -> Vec<DirectedMessage> {
    let reflection: RoomReflection = match serde_json::from_str(raw) {
        Ok(reflection) => reflection,
        Err(error) => {
            warn!(token = %token, %error, "reflection with bad json");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::ReflectRoom, ERR_BAD_JSON),
            );
        }
    };

    let Some(client) = core.sessions.get(token) else {
        return Vec::new();
    };
    let room = client
        .room_id
        .as_ref()
        .and_then(|room_id| core.rooms.get(room_id));
    let Some(room) = room else {
        info!(token = %token, "reflection without a live room");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::ReflectRoom, ERR_NO_ROOM),
        );
    };
    if client.role != ClientRole::Host {
        info!(token = %token, room = %room.room_id, "reflection from a non-host");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::ReflectRoom, ERR_NOT_HOST),
        );
    }

    let envelope = ServerEnvelope::ok_or_internal(ServerMessageKind::ReflectRoom, &reflection);
    room.viewers
        .iter()
        .map(|viewer| DirectedMessage::new(viewer.clone(), envelope.clone()))
        .collect()
}

/// Stores the host's video metadata on the room and forwards it to every
/// viewer. Details with any empty field are dropped without an error reply.
pub fn video_details(core: &mut CoreState, token: &PrivateToken, raw: &str) -> Vec<DirectedMessage> {
    let details: VideoDetails = match serde_json::from_str(raw) {
        Ok(details) => details,
        Err(error) => {
            warn!(token = %token, %error, "video details with bad json");
            return reply(
                token,
                ServerEnvelope::error(ServerMessageKind::ReflectVideoDetails, ERR_BAD_JSON),
            );
        }
    };

    let Some(client) = core.sessions.get(token) else {
        return Vec::new();
    };
    let room_id = client.room_id.clone();
    let Some(room_id) = room_id.filter(|room_id| core.rooms.contains(room_id)) else {
        info!(token = %token, "video details without a live room");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::ReflectVideoDetails, ERR_NO_ROOM),
        );
    };
    if client.role != ClientRole::Host {
        info!(token = %token, room = %room_id, "video details from a non-host");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::ReflectVideoDetails, ERR_NOT_HOST),
        );
    }
    if !details.is_complete() {
        info!(token = %token, room = %room_id, "ignoring incomplete video details");
        return Vec::new();
    }

    let viewers = match core.rooms.get_mut(&room_id) {
        Some(room) => {
            room.video_details = details.clone();
            room.viewers.clone()
        }
        None => return Vec::new(),
    };

    let envelope =
        ServerEnvelope::ok_or_internal(ServerMessageKind::ReflectVideoDetails, &details);
    viewers
        .into_iter()
        .map(|viewer| DirectedMessage::new(viewer, envelope.clone()))
        .collect()
}

/// Round-trip latency probe. Allowed before authorization and never touches
/// the stores.
pub fn ping(token: &PrivateToken, raw: &str) -> Vec<DirectedMessage> {
    if let Err(error) = serde_json::from_str::<PingPong>(raw) {
        warn!(token = %token, %error, "ping with bad json");
        return reply(
            token,
            ServerEnvelope::error(ServerMessageKind::Pong, ERR_BAD_JSON),
        );
    }

    let pong = PingPong {
        timestamp: unix_millis(),
    };
    reply(
        token,
        ServerEnvelope::ok_or_internal(ServerMessageKind::Pong, &pong),
    )
}

fn room_record(core: &CoreState, room_id: &RoomId) -> Option<RoomRecord> {
    core.rooms
        .get(room_id)
        .map(|room| room.record(&core.sessions))
}

/// Fans the current roster to the host and every viewer of a room.
fn update_room_members(core: &CoreState, room_id: &RoomId) -> Vec<DirectedMessage> {
    let Some(room) = core.rooms.get(room_id) else {
        return Vec::new();
    };
    let envelope =
        ServerEnvelope::ok_or_internal(ServerMessageKind::UpdateRoom, &room.record(&core.sessions));

    let mut messages = Vec::with_capacity(room.viewers.len() + 1);
    messages.push(DirectedMessage::new(room.host.clone(), envelope.clone()));
    for viewer in &room.viewers {
        messages.push(DirectedMessage::new(viewer.clone(), envelope.clone()));
    }
    messages
}
