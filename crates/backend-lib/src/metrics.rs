//! Central place for metric keys.

pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const REQUEST_HANDLED: &str = "request.handled";
pub const REQUEST_DROPPED: &str = "request.dropped";
pub const CLIENT_REAPED: &str = "client.reaped";
