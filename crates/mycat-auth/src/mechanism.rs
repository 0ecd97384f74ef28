//! The mechanism abstraction driven by the handshake loop.
//!
//! The handshake sends [`AuthenticateStart`](AuthStart) with the mechanism
//! name and whatever [`AuthMechanism::start`] returns, feeds every server
//! challenge to [`AuthMechanism::next_response`] and finally hands the data
//! carried by the server's OK to [`AuthMechanism::complete`].

use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::ldap_sasl::LdapSaslPlugin;
use crate::password::{ExternalAuth, MySql41Auth, PlainAuth, Sha256MemoryAuth};
use crate::scram::{ScramAlgorithm, ScramClient};

/// Data for the opening message of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthStart {
    /// Mechanism-specific data.
    pub auth_data: Option<Vec<u8>>,
    /// Initial response.
    pub initial_response: Option<Vec<u8>>,
}

/// A single-use authentication exchange.
pub trait AuthMechanism: Send {
    /// Mechanism name sent to the server.
    fn name(&self) -> &'static str;

    /// Produce the opening data.
    fn start(&mut self) -> Result<AuthStart, AuthError>;

    /// Answer a server challenge. `None` means the mechanism has nothing
    /// more to send and expects the server to finish the exchange.
    fn next_response(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError>;

    /// Accept the server's success message and its optional final data.
    fn complete(&mut self, final_data: Option<&[u8]>) -> Result<(), AuthError> {
        let _ = final_data;
        Ok(())
    }
}

/// Known mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// Clear-text password; only safe over TLS.
    Plain,
    /// SHA-1 challenge/response.
    MySql41,
    /// SHA-256 challenge/response against the server's in-memory cache.
    Sha256Memory,
    /// Credentials established outside the protocol.
    External,
    /// SCRAM with SHA-1.
    ScramSha1,
    /// SCRAM with SHA-256.
    ScramSha256,
    /// LDAP SASL plugin tunnelling SCRAM.
    LdapSasl,
}

impl AuthMethod {
    /// Wire name of the mechanism.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::MySql41 => "MYSQL41",
            Self::Sha256Memory => "SHA256_MEMORY",
            Self::External => "EXTERNAL",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::LdapSasl => "mysql_ldap_sasl",
        }
    }

    /// Look up a mechanism by wire name.
    pub fn from_name(name: &str) -> Result<Self, AuthError> {
        [
            Self::Plain,
            Self::MySql41,
            Self::Sha256Memory,
            Self::External,
            Self::ScramSha1,
            Self::ScramSha256,
            Self::LdapSasl,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| AuthError::UnknownMechanism(name.to_string()))
    }

    /// Create a fresh exchange for these credentials.
    #[must_use]
    pub fn create(self, credentials: &Credentials) -> Box<dyn AuthMechanism> {
        match self {
            Self::Plain => Box::new(PlainAuth::new(credentials.clone())),
            Self::MySql41 => Box::new(MySql41Auth::new(credentials.clone())),
            Self::Sha256Memory => Box::new(Sha256MemoryAuth::new(credentials.clone())),
            Self::External => Box::new(ExternalAuth::new(credentials.clone())),
            Self::ScramSha1 => Box::new(ScramClient::new(ScramAlgorithm::Sha1, credentials)),
            Self::ScramSha256 => Box::new(ScramClient::new(ScramAlgorithm::Sha256, credentials)),
            Self::LdapSasl => Box::new(LdapSaslPlugin::new(credentials.clone())),
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for name in [
            "PLAIN",
            "MYSQL41",
            "SHA256_MEMORY",
            "EXTERNAL",
            "SCRAM-SHA-1",
            "SCRAM-SHA-256",
            "mysql_ldap_sasl",
        ] {
            assert_eq!(AuthMethod::from_name(name).unwrap().name(), name);
        }
        assert!(AuthMethod::from_name("KERBEROS").is_err());
    }

    #[test]
    fn test_created_mechanism_reports_name() {
        let creds = Credentials::new("u", "p");
        let mech = AuthMethod::ScramSha256.create(&creds);
        assert_eq!(mech.name(), "SCRAM-SHA-256");
    }
}
