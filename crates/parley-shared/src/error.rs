use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing session token")]
    MissingToken,

    #[error("Malformed session token: {0}")]
    Malformed(String),

    #[error("Session token expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid issuer key")]
    InvalidIssuerKey,

    #[error("Unknown user")]
    UnknownUser,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Invalid event: {0}")]
    Invalid(String),
}
