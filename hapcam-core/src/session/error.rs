use thiserror::Error;

use super::types::SessionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {session}: {media} request is missing `{field}`")]
    MissingField {
        session: SessionId,
        media: &'static str,
        field: &'static str,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
