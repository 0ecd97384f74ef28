//! SCRAM authentication (RFC 5802, RFC 7677).
//!
//! Two round trips:
//!
//! 1. client-first `n,,n=<user>,r=<client nonce>`
//! 2. server-first `r=<combined nonce>,s=<salt>,i=<iterations>`
//! 3. client-final `c=biws,r=<combined nonce>,p=<proof>`
//! 4. server-final `v=<server signature>`
//!
//! The exchange fails closed: it only counts as complete once the server
//! signature has been verified.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::mechanism::{AuthMechanism, AuthStart};

const NONCE_LEN: usize = 24;
const GS2_HEADER: &str = "n,,";
// base64("n,,")
const CHANNEL_BINDING: &str = "biws";

/// Hash function behind a SCRAM exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramAlgorithm {
    /// SCRAM-SHA-1.
    Sha1,
    /// SCRAM-SHA-256.
    Sha256,
}

impl ScramAlgorithm {
    /// Mechanism name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "SCRAM-SHA-1",
            Self::Sha256 => "SCRAM-SHA-256",
        }
    }

    /// Look up by mechanism name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCRAM-SHA-1" => Some(Self::Sha1),
            "SCRAM-SHA-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let crypto = |e: hmac::digest::InvalidLength| AuthError::Crypto(e.to_string());
        Ok(match self {
            Self::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(crypto)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(crypto)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn salted_password(
        self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>, AuthError> {
        let crypto = |e: hmac::digest::InvalidLength| AuthError::Crypto(e.to_string());
        Ok(match self {
            Self::Sha1 => {
                let mut out = [0u8; 20];
                pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iterations, &mut out)
                    .map_err(crypto)?;
                out.to_vec()
            }
            Self::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
                    .map_err(crypto)?;
                out.to_vec()
            }
        })
    }
}

/// Escape a user name for the `n=` attribute.
#[must_use]
pub fn escape_saslname(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

#[derive(Debug)]
enum State {
    Initial,
    FirstSent,
    FinalSent {
        server_signature: Vec<u8>,
    },
    Verified,
    Failed,
}

/// Client side of a SCRAM exchange.
pub struct ScramClient {
    algorithm: ScramAlgorithm,
    username: String,
    password: String,
    client_nonce: String,
    state: State,
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("algorithm", &self.algorithm)
            .field("username", &self.username)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce.
    pub fn new(algorithm: ScramAlgorithm, credentials: &Credentials) -> Self {
        let nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce(algorithm, credentials, nonce)
    }

    /// Start an exchange with a fixed nonce.
    pub fn with_nonce(
        algorithm: ScramAlgorithm,
        credentials: &Credentials,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            username: credentials.user.clone(),
            password: credentials.password.clone(),
            client_nonce: nonce.into(),
            state: State::Initial,
        }
    }

    fn client_first_bare(&self) -> String {
        format!(
            "n={},r={}",
            escape_saslname(&self.username),
            self.client_nonce
        )
    }

    /// The client-first message.
    #[must_use]
    pub fn client_first(&mut self) -> Vec<u8> {
        self.state = State::FirstSent;
        format!("{GS2_HEADER}{}", self.client_first_bare()).into_bytes()
    }

    /// Consume server-first and produce client-final.
    pub fn process_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        if !matches!(self.state, State::FirstSent) {
            self.state = State::Failed;
            return Err(AuthError::UnexpectedChallenge {
                mechanism: self.algorithm.name(),
            });
        }
        let result = self.derive_final(data);
        match result {
            Ok((message, server_signature)) => {
                self.state = State::FinalSent { server_signature };
                Ok(message)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn derive_final(&self, data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| AuthError::MalformedChallenge(format!("server-first: {e}")))?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|e| AuthError::MalformedChallenge(format!("salt: {e}")))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value.parse::<u32>().map_err(|e| {
                    AuthError::MalformedChallenge(format!("iteration count: {e}"))
                })?);
            } else if part.starts_with("m=") {
                return Err(AuthError::MalformedChallenge(
                    "mandatory extension not supported".to_string(),
                ));
            }
        }

        let combined_nonce = combined_nonce
            .ok_or_else(|| AuthError::MalformedChallenge("missing nonce".to_string()))?;
        let salt = salt.ok_or_else(|| AuthError::MalformedChallenge("missing salt".to_string()))?;
        let iterations = iterations
            .filter(|i| *i > 0)
            .ok_or_else(|| AuthError::MalformedChallenge("missing iteration count".to_string()))?;

        if !combined_nonce.starts_with(&self.client_nonce)
            || combined_nonce.len() <= self.client_nonce.len()
        {
            return Err(AuthError::NonceMismatch);
        }

        let alg = self.algorithm;
        let salted = alg.salted_password(self.password.as_bytes(), &salt, iterations)?;
        let client_key = alg.hmac(&salted, b"Client Key")?;
        let stored_key = alg.hash(&client_key);

        let without_proof = format!("c={CHANNEL_BINDING},r={combined_nonce}");
        let auth_message = format!("{},{msg},{without_proof}", self.client_first_bare());

        let client_signature = alg.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(a, b)| a ^ b)
            .collect();

        let server_key = alg.hmac(&salted, b"Server Key")?;
        let server_signature = alg.hmac(&server_key, auth_message.as_bytes())?;

        let client_final = format!("{without_proof},p={}", BASE64.encode(proof));
        Ok((client_final.into_bytes(), server_signature))
    }

    /// Verify server-final.
    pub fn verify_server_final(&mut self, data: &[u8]) -> Result<(), AuthError> {
        let expected = match std::mem::replace(&mut self.state, State::Failed) {
            State::FinalSent { server_signature } => server_signature,
            _ => return Err(AuthError::MissingServerSignature),
        };
        let msg = std::str::from_utf8(data)
            .map_err(|e| AuthError::MalformedChallenge(format!("server-final: {e}")))?;
        if let Some(err) = msg.strip_prefix("e=") {
            return Err(AuthError::MalformedChallenge(format!("server error: {err}")));
        }
        let signature = msg
            .strip_prefix("v=")
            .ok_or(AuthError::MissingServerSignature)?;
        let signature = BASE64
            .decode(signature)
            .map_err(|e| AuthError::MalformedChallenge(format!("server signature: {e}")))?;

        if signature.ct_eq(&expected).into() {
            self.state = State::Verified;
            Ok(())
        } else {
            Err(AuthError::ServerSignatureMismatch)
        }
    }

    /// Whether the server signature has been verified.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self.state, State::Verified)
    }
}

impl AuthMechanism for ScramClient {
    fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart {
            auth_data: None,
            initial_response: Some(self.client_first()),
        })
    }

    fn next_response(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        match self.state {
            State::FirstSent => self.process_server_first(challenge).map(Some),
            State::FinalSent { .. } => {
                self.verify_server_final(challenge)?;
                Ok(None)
            }
            _ => Err(AuthError::UnexpectedChallenge {
                mechanism: self.algorithm.name(),
            }),
        }
    }

    fn complete(&mut self, final_data: Option<&[u8]>) -> Result<(), AuthError> {
        if self.is_verified() {
            return Ok(());
        }
        match final_data {
            Some(data) if !data.is_empty() => self.verify_server_final(data),
            _ => {
                self.state = State::Failed;
                Err(AuthError::MissingServerSignature)
            }
        }
    }
}
