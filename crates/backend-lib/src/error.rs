//! Library error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("connection is not registered")]
    ConnectionNotFound,

    #[error("connection channel is closed")]
    ChannelClosed,

    #[error("client is missing an identity token")]
    MissingToken,
}
