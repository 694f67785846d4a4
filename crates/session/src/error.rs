use thiserror::Error;

use crate::frame::FrameError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("connection closed by peer with code {code}: {reason}")]
    AbnormalClose { code: u16, reason: String },

    #[error("reading local input: {0}")]
    Input(#[source] std::io::Error),

    #[error("writing local output: {0}")]
    Output(#[source] std::io::Error),

    #[error("malformed log record: {0}")]
    Record(#[from] serde_json::Error),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
