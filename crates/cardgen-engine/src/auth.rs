use std::collections::BTreeMap;
use std::sync::Arc;

use cardgen_contracts::config::StudioConfig;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type Digest32 = [u8; 32];

/// Username to secret table loaded once at startup and shared read-only
/// between sessions. Only digests are kept in memory.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    digests: BTreeMap<String, Digest32>,
}

impl CredentialStore {
    pub fn new(credentials: &BTreeMap<String, String>) -> Self {
        let digests = credentials
            .iter()
            .map(|(user, secret)| (user.clone(), digest(secret)))
            .collect();
        Self { digests }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(&config.credentials)
    }

    /// Unknown users fail without a comparison.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.digests.get(username) {
            Some(expected) => bool::from(expected.ct_eq(&digest(password))),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

fn digest(secret: &str) -> Digest32 {
    Sha256::digest(secret.as_bytes()).into()
}

/// Per-session login state.
#[derive(Debug, Clone)]
pub struct AuthGate {
    store: Arc<CredentialStore>,
    identity: Option<String>,
}

impl AuthGate {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            identity: None,
        }
    }

    /// On success the session identity becomes `username`; a failed attempt
    /// leaves any existing identity untouched.
    pub fn authenticate(&mut self, username: &str, password: &str) -> bool {
        if !self.store.verify(username, password) {
            return false;
        }
        self.identity = Some(username.to_string());
        true
    }

    pub fn logout(&mut self) {
        self.identity = None;
    }

    pub fn current_user(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}
