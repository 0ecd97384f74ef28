//! Authentication error types.

use thiserror::Error;

/// Errors raised while running an authentication exchange.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The server rejected the credentials.
    #[error("authentication rejected ({code}, {sql_state}): {message}")]
    Rejected {
        /// Server error code.
        code: u32,
        /// SQLSTATE.
        sql_state: String,
        /// Server message.
        message: String,
    },

    /// The mechanism received data it was not expecting at this step.
    #[error("{mechanism}: unexpected server data during authentication")]
    UnexpectedChallenge {
        /// Mechanism name.
        mechanism: &'static str,
    },

    /// Server data could not be parsed.
    #[error("malformed server data: {0}")]
    MalformedChallenge(String),

    /// The server nonce does not extend the client nonce.
    #[error("server nonce does not start with the client nonce")]
    NonceMismatch,

    /// The server signature did not verify.
    #[error("server signature mismatch")]
    ServerSignatureMismatch,

    /// The exchange ended without the server proving knowledge of the key.
    #[error("authentication finished without a verified server signature")]
    MissingServerSignature,

    /// The server asked for an unknown SASL method.
    #[error("unsupported SASL method: {0}")]
    UnsupportedMethod(String),

    /// Unknown mechanism name.
    #[error("unknown authentication mechanism: {0}")]
    UnknownMechanism(String),

    /// Cryptographic primitive failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl AuthError {
    /// Whether the server itself refused the login.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
