//! LDAP SASL plugin.
//!
//! The server's first data names the SCRAM method to use; everything after
//! that is a plain SCRAM exchange.

use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::mechanism::{AuthMechanism, AuthStart};
use crate::scram::{ScramAlgorithm, ScramClient};

/// Plugin name announced to the server.
pub const PLUGIN_NAME: &str = "mysql_ldap_sasl";

/// Tunnels SCRAM through the `mysql_ldap_sasl` plugin.
#[derive(Debug)]
pub struct LdapSaslPlugin {
    credentials: Credentials,
    method: Option<ScramClient>,
}

impl LdapSaslPlugin {
    /// Create the plugin.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            method: None,
        }
    }

    /// The negotiated method, once the server has named it.
    #[must_use]
    pub fn method(&self) -> Option<&ScramClient> {
        self.method.as_ref()
    }
}

impl AuthMechanism for LdapSaslPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart::default())
    }

    fn next_response(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        if let Some(method) = &mut self.method {
            return method.next_response(challenge);
        }

        let name = std::str::from_utf8(challenge)
            .map_err(|e| AuthError::MalformedChallenge(format!("SASL method name: {e}")))?
            .trim_end_matches('\0');
        let algorithm = ScramAlgorithm::from_name(name)
            .ok_or_else(|| AuthError::UnsupportedMethod(name.to_string()))?;
        tracing::debug!(method = name, "LDAP SASL method selected");

        let mut method = ScramClient::new(algorithm, &self.credentials);
        let first = method.client_first();
        self.method = Some(method);
        Ok(Some(first))
    }

    fn complete(&mut self, final_data: Option<&[u8]>) -> Result<(), AuthError> {
        match &mut self.method {
            Some(method) => method.complete(final_data),
            None => Err(AuthError::MissingServerSignature),
        }
    }
}
