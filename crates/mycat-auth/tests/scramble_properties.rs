//! Properties of the password scrambles and SASL name escaping.

#![allow(clippy::unwrap_used)]

use mycat_auth::password::{mysql41_scramble, sha256_memory_scramble};
use mycat_auth::scram::escape_saslname;
use mycat_auth::{AuthMechanism, Credentials, MySql41Auth, Sha256MemoryAuth};
use proptest::prelude::*;
use sha1::Sha1;
use sha2::{Digest, Sha256};

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn unescape_saslname(escaped: &str) -> String {
    escaped.replace("=2C", ",").replace("=3D", "=")
}

proptest! {
    #[test]
    fn mysql41_server_recovers_stage1(
        password in ".{1,32}",
        nonce in proptest::collection::vec(any::<u8>(), 1..40),
    ) {
        let scramble = mysql41_scramble(&password, &nonce);
        let stored = Sha1::digest(Sha1::digest(password.as_bytes()));
        let mut hasher = Sha1::new();
        hasher.update(&nonce);
        hasher.update(stored);
        let recovered = xor(&scramble, &hasher.finalize());
        let digest = Sha1::digest(&recovered);
        prop_assert_eq!(digest.as_slice(), stored.as_slice());
    }

    #[test]
    fn sha256_memory_server_recovers_stage1(
        password in ".{1,32}",
        nonce in proptest::collection::vec(any::<u8>(), 1..40),
    ) {
        let scramble = sha256_memory_scramble(&password, &nonce);
        let stored = Sha256::digest(Sha256::digest(password.as_bytes()));
        let mut hasher = Sha256::new();
        hasher.update(stored);
        hasher.update(&nonce);
        let recovered = xor(&scramble, &hasher.finalize());
        let digest = Sha256::digest(&recovered);
        prop_assert_eq!(digest.as_slice(), stored.as_slice());
    }

    #[test]
    fn nonce_responses_have_fixed_shape(
        user in "[a-z]{1,12}",
        password in "[ -~]{1,24}",
        nonce in proptest::collection::vec(any::<u8>(), 20..=20),
    ) {
        let mut mysql41 = MySql41Auth::new(Credentials::new(user.clone(), password.clone()));
        let response = mysql41.next_response(&nonce).unwrap().unwrap();
        let text = String::from_utf8(response).unwrap();
        let prefix = format!("\0{user}\0*");
        prop_assert!(text.starts_with(&prefix));
        prop_assert_eq!(text.len(), prefix.len() + 40);

        let mut sha256 = Sha256MemoryAuth::new(Credentials::new(user.clone(), password));
        let response = sha256.next_response(&nonce).unwrap().unwrap();
        let prefix = format!("\0{user}\0");
        prop_assert_eq!(response.len(), prefix.len() + 64);
        prop_assert!(response[prefix.len()..].iter().all(u8::is_ascii_hexdigit));
    }

    #[test]
    fn saslname_escaping_is_reversible(name in ".{0,24}") {
        let escaped = escape_saslname(&name);
        prop_assert!(!escaped.contains(','));
        prop_assert_eq!(unescape_saslname(&escaped), name);
    }
}
