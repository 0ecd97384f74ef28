//! Password-based mechanisms.
//!
//! ```text
//! PLAIN          schema \0 user \0 password
//! MYSQL41        schema \0 user \0 *HEX(SHA1(pw) XOR SHA1(nonce + SHA1(SHA1(pw))))
//! SHA256_MEMORY  schema \0 user \0 HEX(SHA256(SHA256(SHA256(pw)) + nonce) XOR SHA256(pw))
//! ```

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::mechanism::{AuthMechanism, AuthStart};

fn hex_upper(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from(DIGITS[usize::from(b >> 4)]));
        out.push(char::from(DIGITS[usize::from(b & 0x0F)]));
    }
    out
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// MYSQL41 scramble for `password` against `nonce`.
#[must_use]
pub fn mysql41_scramble(password: &str, nonce: &[u8]) -> Vec<u8> {
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let stage3 = hasher.finalize();
    xor(&stage1, &stage3)
}

/// SHA256_MEMORY scramble for `password` against `nonce`.
#[must_use]
pub fn sha256_memory_scramble(password: &str, nonce: &[u8]) -> Vec<u8> {
    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(nonce);
    let stage3 = hasher.finalize();
    xor(&stage3, &stage1)
}

/// PLAIN: the password goes in the opening message.
#[derive(Debug)]
pub struct PlainAuth {
    credentials: Credentials,
}

impl PlainAuth {
    /// Create the mechanism.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl AuthMechanism for PlainAuth {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart {
            auth_data: Some(
                self.credentials
                    .login_payload(self.credentials.password.as_bytes()),
            ),
            initial_response: None,
        })
    }

    fn next_response(&mut self, _challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        Err(AuthError::UnexpectedChallenge { mechanism: "PLAIN" })
    }
}

/// Shared shape of the two nonce-scramble mechanisms.
#[derive(Debug)]
struct NonceExchange {
    credentials: Credentials,
    answered: bool,
}

impl NonceExchange {
    fn answer(
        &mut self,
        mechanism: &'static str,
        nonce: &[u8],
        scramble: impl FnOnce(&str, &[u8]) -> String,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        if self.answered {
            return Err(AuthError::UnexpectedChallenge { mechanism });
        }
        if nonce.is_empty() {
            return Err(AuthError::MalformedChallenge(format!(
                "{mechanism}: empty nonce"
            )));
        }
        self.answered = true;
        let tail = if self.credentials.password.is_empty() {
            String::new()
        } else {
            scramble(&self.credentials.password, nonce)
        };
        Ok(Some(self.credentials.login_payload(tail.as_bytes())))
    }
}

/// MYSQL41: SHA-1 scramble over a server nonce.
#[derive(Debug)]
pub struct MySql41Auth {
    inner: NonceExchange,
}

impl MySql41Auth {
    /// Create the mechanism.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: NonceExchange {
                credentials,
                answered: false,
            },
        }
    }
}

impl AuthMechanism for MySql41Auth {
    fn name(&self) -> &'static str {
        "MYSQL41"
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart::default())
    }

    fn next_response(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        self.inner.answer("MYSQL41", challenge, |pw, nonce| {
            format!("*{}", hex_upper(&mysql41_scramble(pw, nonce)))
        })
    }
}

/// SHA256_MEMORY: SHA-256 scramble over a server nonce.
#[derive(Debug)]
pub struct Sha256MemoryAuth {
    inner: NonceExchange,
}

impl Sha256MemoryAuth {
    /// Create the mechanism.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: NonceExchange {
                credentials,
                answered: false,
            },
        }
    }
}

impl AuthMechanism for Sha256MemoryAuth {
    fn name(&self) -> &'static str {
        "SHA256_MEMORY"
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart::default())
    }

    fn next_response(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        self.inner.answer("SHA256_MEMORY", challenge, |pw, nonce| {
            hex_upper(&sha256_memory_scramble(pw, nonce))
        })
    }
}

/// EXTERNAL: identity comes from the transport, only the schema is sent.
#[derive(Debug)]
pub struct ExternalAuth {
    credentials: Credentials,
}

impl ExternalAuth {
    /// Create the mechanism.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl AuthMechanism for ExternalAuth {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn start(&mut self) -> Result<AuthStart, AuthError> {
        Ok(AuthStart {
            auth_data: Some(self.credentials.schema.as_bytes().to_vec()),
            initial_response: None,
        })
    }

    fn next_response(&mut self, _challenge: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        Err(AuthError::UnexpectedChallenge {
            mechanism: "EXTERNAL",
        })
    }
}
