//! Login credentials.

use std::fmt;

/// User name, password and default schema for one login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub user: String,
    /// Password; may be empty.
    pub password: String,
    /// Default schema; may be empty.
    pub schema: String,
}

impl Credentials {
    /// Create credentials without a default schema.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            schema: String::new(),
        }
    }

    /// Set the default schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// `schema \0 user \0` followed by `tail`.
    pub(crate) fn login_payload(&self, tail: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.schema.len() + self.user.len() + tail.len() + 2);
        out.extend_from_slice(self.schema.as_bytes());
        out.push(0);
        out.extend_from_slice(self.user.as_bytes());
        out.push(0);
        out.extend_from_slice(tail);
        out
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("root", "secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("root"));
    }

    #[test]
    fn test_login_payload() {
        let creds = Credentials::new("u", "p").with_schema("db");
        assert_eq!(creds.login_payload(b"x"), b"db\0u\0x".to_vec());
    }
}
