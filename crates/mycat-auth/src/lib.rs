//! # mycat-auth
//!
//! Authentication mechanisms for the mycat MySQL driver.
//!
//! Mechanisms are pure state machines: they turn server challenges into
//! client responses and never touch the network. The handshake loop in
//! `mycat-client` drives them.
//!
//! ## Supported mechanisms
//!
//! | Mechanism | Type |
//! |-----------|------|
//! | `PLAIN` | [`PlainAuth`] |
//! | `MYSQL41` | [`MySql41Auth`] |
//! | `SHA256_MEMORY` | [`Sha256MemoryAuth`] |
//! | `EXTERNAL` | [`ExternalAuth`] |
//! | `SCRAM-SHA-1`, `SCRAM-SHA-256` | [`ScramClient`] |
//! | `mysql_ldap_sasl` | [`LdapSaslPlugin`] |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod ldap_sasl;
pub mod mechanism;
pub mod password;
pub mod scram;

pub use credentials::Credentials;
pub use error::AuthError;
pub use ldap_sasl::LdapSaslPlugin;
pub use mechanism::{AuthMechanism, AuthMethod, AuthStart};
pub use password::{ExternalAuth, MySql41Auth, PlainAuth, Sha256MemoryAuth};
pub use scram::{ScramAlgorithm, ScramClient};
