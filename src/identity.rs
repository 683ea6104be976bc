// identity.rs
//! Per-poll voter identity.
//!
//! A voter is whoever holds the token stored under `voter_{poll_id}` in the
//! device's durable storage. Tokens are never shared between polls, so the same
//! person voting on two polls holds two unrelated tokens.
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Builder;

use crate::error::TokenStoreError;
use crate::models::{IssuedToken, Persistence, PollId, VoterToken};

const TOKEN_KEY_PREFIX: &str = "voter_";

pub fn token_key(poll_id: PollId) -> String {
    format!("{TOKEN_KEY_PREFIX}{poll_id}")
}

/// Durable key-value storage local to one device.
pub trait TokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError>;
}

impl<T: TokenStore + ?Sized> TokenStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        (**self).set(key, value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| TokenStoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| TokenStoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Token store kept as a JSON object in a single file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, TokenStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| TokenStoreError::Unavailable(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(TokenStoreError::Unavailable(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        let unavailable = |e: &dyn std::fmt::Display| {
            TokenStoreError::Unavailable(format!("{}: {e}", self.path.display()))
        };

        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        let json = serde_json::to_string_pretty(&entries).map_err(|e| unavailable(&e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| unavailable(&e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&e))?;
        Ok(())
    }
}

/// Storage that refuses every call, as with disabled or private-mode storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTokenStore;

impl TokenStore for DisabledTokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, TokenStoreError> {
        Err(TokenStoreError::Unavailable("storage disabled".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), TokenStoreError> {
        Err(TokenStoreError::Unavailable("storage disabled".into()))
    }
}

/// Generate a token from `rng`, falling back to a clock-seeded composite when it fails.
pub fn generate_token<R: RngCore>(rng: &mut R) -> VoterToken {
    let mut bytes = [0u8; 16];
    match rng.try_fill_bytes(&mut bytes) {
        Ok(()) => VoterToken::new(Builder::from_random_bytes(bytes).into_uuid().to_string()),
        Err(e) => {
            warn!(error = %e, "Entropy source unavailable, using fallback voter token");
            fallback_token()
        }
    }
}

/// Pseudo-random value followed by a millisecond timestamp, both base-36.
///
/// NOT collision-free: two devices generating in the same millisecond with the
/// same seed would share a token. A collision only merges two voters into one
/// vote identity; it cannot corrupt stored rows.
fn fallback_token() -> VoterToken {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = now.as_nanos() as u64 ^ u64::from(std::process::id()).rotate_left(32);
    let noise: u64 = StdRng::seed_from_u64(seed).gen();

    VoterToken::new(format!(
        "{}{}",
        to_base36(noise),
        to_base36(now.as_millis() as u64)
    ))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Issues the voter token for a poll, persisting it when storage allows.
pub struct VoterIdentityProvider<S, R = OsRng> {
    store: S,
    rng: Mutex<R>,
}

impl<S: TokenStore> VoterIdentityProvider<S> {
    pub fn new(store: S) -> Self {
        Self::with_rng(store, OsRng)
    }
}

impl<S: TokenStore, R: RngCore> VoterIdentityProvider<S, R> {
    pub fn with_rng(store: S, rng: R) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the stored token for `poll_id`, creating one on first use.
    ///
    /// Never fails. When storage rejects the new token it is returned as
    /// [`Persistence::Ephemeral`] and a later call may hand out a different one.
    pub fn get_or_create_token(&self, poll_id: PollId) -> IssuedToken {
        let key = token_key(poll_id);

        match self.store.get(&key) {
            Ok(Some(existing)) if !existing.is_empty() => {
                debug!(poll_id, "Using stored voter token");
                return IssuedToken {
                    token: VoterToken::new(existing),
                    persistence: Persistence::Stored,
                };
            }
            Ok(_) => {}
            Err(e) => warn!(poll_id, error = %e, "Could not read voter token"),
        }

        let token = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            generate_token(&mut *rng)
        };

        match self.store.set(&key, token.as_str()) {
            Ok(()) => {
                info!(poll_id, "Created voter token");
                IssuedToken {
                    token,
                    persistence: Persistence::Created,
                }
            }
            Err(e) => {
                warn!(poll_id, error = %e, "Voter token not persisted, using ephemeral token");
                IssuedToken {
                    token,
                    persistence: Persistence::Ephemeral,
                }
            }
        }
    }
}
