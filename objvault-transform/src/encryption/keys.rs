//! Master key sources for the encryption transform.
//!
//! A source hands out immutable [`KeySnapshot`]s: the current encryption key
//! plus every key that may decrypt. Rotation swaps the snapshot under a short
//! write lock, so encoders already running keep the key they started with.

use crate::config::KeyStoreConfig;
use crate::error::{TransformError, TransformResult};
use crate::keystore::{KeyStore, PemDirectoryKeyStore};
use objvault_crypto::MasterKeyPair;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Smallest RSA modulus accepted for the current key.
pub const MIN_MASTER_KEY_BITS: usize = 1024;

/// Modulus size below which a warning is logged.
pub const RECOMMENDED_MASTER_KEY_BITS: usize = 2048;

/// Point-in-time view of the master keys.
#[derive(Debug)]
pub struct KeySnapshot {
    current_id: String,
    keys: HashMap<String, Arc<MasterKeyPair>>,
}

impl KeySnapshot {
    fn new(current_id: String, keys: HashMap<String, Arc<MasterKeyPair>>) -> TransformResult<Self> {
        if !keys.contains_key(&current_id) {
            return Err(TransformError::UnknownKey(current_id));
        }
        Ok(Self { current_id, keys })
    }

    /// Builds a snapshot whose current key just changed, enforcing the
    /// minimum key size on it.
    fn with_new_current(
        current_id: String,
        keys: HashMap<String, Arc<MasterKeyPair>>,
    ) -> TransformResult<Self> {
        let snapshot = Self::new(current_id, keys)?;
        check_key_size(snapshot.current_id(), snapshot.current())?;
        Ok(snapshot)
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn current(&self) -> &MasterKeyPair {
        // `new` guarantees the current id is present.
        &self.keys[&self.current_id]
    }

    /// Decryption candidate with fingerprint `id`.
    pub fn get(&self, id: &str) -> Option<&MasterKeyPair> {
        self.keys.get(id).map(Arc::as_ref)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    /// All decryption candidate ids, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Rejects keys under [`MIN_MASTER_KEY_BITS`] and warns on keys under
/// [`RECOMMENDED_MASTER_KEY_BITS`].
pub fn check_key_size(id: &str, pair: &MasterKeyPair) -> TransformResult<()> {
    let bits = pair.key_size_bits();
    if bits < MIN_MASTER_KEY_BITS {
        return Err(TransformError::Configuration(format!(
            "master key {id} is {bits} bits, minimum is {MIN_MASTER_KEY_BITS}"
        )));
    }
    if bits < RECOMMENDED_MASTER_KEY_BITS {
        warn!(
            "Master key {id} is only {bits} bits; {RECOMMENDED_MASTER_KEY_BITS} or more is recommended"
        );
    }
    Ok(())
}

/// Supplies the current encryption key and the decryption candidates.
pub trait MasterKeySource: Send + Sync {
    fn snapshot(&self) -> Arc<KeySnapshot>;

    fn current_key_id(&self) -> String {
        self.snapshot().current_id().to_string()
    }
}

fn read_state(state: &RwLock<Arc<KeySnapshot>>) -> Arc<KeySnapshot> {
    // A poisoned lock still holds a complete snapshot: writers only ever
    // replace the Arc.
    match state.read() {
        Ok(guard) => Arc::clone(&guard),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    }
}

fn replace_state(state: &RwLock<Arc<KeySnapshot>>, next: KeySnapshot) {
    let next = Arc::new(next);
    match state.write() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Keys supplied directly as in-memory pairs, indexed by fingerprint.
#[derive(Debug)]
pub struct BareKeySource {
    state: RwLock<Arc<KeySnapshot>>,
}

impl BareKeySource {
    /// `current` encrypts new objects; it and every pair in `others` decrypt.
    pub fn new(
        current: MasterKeyPair,
        others: impl IntoIterator<Item = MasterKeyPair>,
    ) -> TransformResult<Self> {
        let current_id = current.fingerprint()?;
        let mut keys = HashMap::new();
        keys.insert(current_id.clone(), Arc::new(current));
        for pair in others {
            keys.insert(pair.fingerprint()?, Arc::new(pair));
        }
        let snapshot = KeySnapshot::with_new_current(current_id, keys)?;
        debug!(
            "Bare key source: current {} with {} decryption keys",
            snapshot.current_id(),
            snapshot.keys.len()
        );
        Ok(Self {
            state: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Registers an extra decryption key and returns its fingerprint.
    pub fn add_decryption_key(&self, pair: MasterKeyPair) -> TransformResult<String> {
        let id = pair.fingerprint()?;
        let old = read_state(&self.state);
        let mut keys = old.keys.clone();
        keys.insert(id.clone(), Arc::new(pair));
        replace_state(&self.state, KeySnapshot::new(old.current_id.clone(), keys)?);
        Ok(id)
    }

    /// Makes the registered key `fingerprint` the encryption key.
    pub fn set_current_key(&self, fingerprint: &str) -> TransformResult<()> {
        let old = read_state(&self.state);
        if !old.contains(fingerprint) {
            return Err(TransformError::UnknownKey(fingerprint.to_string()));
        }
        let next = KeySnapshot::with_new_current(fingerprint.to_string(), old.keys.clone())?;
        replace_state(&self.state, next);
        debug!("Current master key is now {fingerprint}");
        Ok(())
    }
}

impl MasterKeySource for BareKeySource {
    fn snapshot(&self) -> Arc<KeySnapshot> {
        read_state(&self.state)
    }
}

/// Keys resolved by alias from a password-protected keystore.
///
/// Each certificate's key id is its Subject Key Identifier when present,
/// otherwise the public key fingerprint. Only aliases whose password was
/// supplied are unlocked and can decrypt.
pub struct KeyStoreKeySource {
    store: Arc<dyn KeyStore>,
    aliases: BTreeMap<String, String>,
    state: RwLock<Arc<KeySnapshot>>,
}

impl KeyStoreKeySource {
    pub fn new(
        store: Arc<dyn KeyStore>,
        current_alias: &str,
        passwords: &HashMap<String, Zeroizing<Vec<u8>>>,
    ) -> TransformResult<Self> {
        let mut aliases = BTreeMap::new();
        let mut keys = HashMap::new();
        let mut current_id = None;

        for alias in store.aliases() {
            let id = store.certificate(&alias)?.key_id()?;
            if alias == current_alias {
                current_id = Some(id.clone());
            }
            if let Some(password) = passwords.get(&alias) {
                let pair = store.private_key(&alias, password)?;
                keys.insert(id.clone(), Arc::new(pair));
            }
            aliases.insert(id, alias);
        }

        let current_id = current_id.ok_or_else(|| {
            TransformError::Configuration(format!("current alias {current_alias} not in keystore"))
        })?;
        if !keys.contains_key(&current_id) {
            return Err(TransformError::Configuration(format!(
                "no password supplied for current alias {current_alias}"
            )));
        }

        let snapshot = KeySnapshot::with_new_current(current_id, keys)?;
        debug!(
            "Keystore key source: {} aliases, current {current_alias} ({})",
            aliases.len(),
            snapshot.current_id()
        );
        Ok(Self {
            store,
            aliases,
            state: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Opens the PEM directory keystore named by `config`.
    pub fn from_config(
        config: &KeyStoreConfig,
        passwords: &HashMap<String, Zeroizing<Vec<u8>>>,
    ) -> TransformResult<Self> {
        let path = config
            .path
            .as_ref()
            .ok_or_else(|| TransformError::Configuration("keystore.path not set".to_string()))?;
        let alias = config.current_alias.as_deref().ok_or_else(|| {
            TransformError::Configuration("keystore.current_alias not set".to_string())
        })?;
        Self::new(Arc::new(PemDirectoryKeyStore::open(path)?), alias, passwords)
    }

    /// Alias whose certificate has key id `id`.
    pub fn alias_for(&self, id: &str) -> Option<&str> {
        self.aliases.get(id).map(String::as_str)
    }

    /// Key id of `alias`, if it is in the keystore.
    pub fn key_id_for(&self, alias: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, a)| a.as_str() == alias)
            .map(|(id, _)| id.as_str())
    }

    pub fn current_alias(&self) -> Option<String> {
        let snapshot = read_state(&self.state);
        self.alias_for(snapshot.current_id()).map(str::to_string)
    }

    /// Makes an unlocked alias the encryption key.
    pub fn set_current_alias(&self, alias: &str) -> TransformResult<()> {
        let id = self
            .key_id_for(alias)
            .ok_or_else(|| TransformError::Configuration(format!("alias {alias} not in keystore")))?
            .to_string();
        let old = read_state(&self.state);
        if !old.contains(&id) {
            return Err(TransformError::Configuration(format!(
                "alias {alias} is not unlocked"
            )));
        }
        replace_state(&self.state, KeySnapshot::with_new_current(id, old.keys.clone())?);
        debug!("Current master key alias is now {alias}");
        Ok(())
    }

    /// Unlocks another alias as a decryption key.
    pub fn unlock(&self, alias: &str, password: &[u8]) -> TransformResult<()> {
        let id = self
            .key_id_for(alias)
            .ok_or_else(|| TransformError::Configuration(format!("alias {alias} not in keystore")))?
            .to_string();
        let pair = self.store.private_key(alias, password)?;
        let old = read_state(&self.state);
        let mut keys = old.keys.clone();
        keys.insert(id, Arc::new(pair));
        replace_state(&self.state, KeySnapshot::new(old.current_id.clone(), keys)?);
        Ok(())
    }
}

impl MasterKeySource for KeyStoreKeySource {
    fn snapshot(&self) -> Arc<KeySnapshot> {
        read_state(&self.state)
    }
}

impl std::fmt::Debug for KeyStoreKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStoreKeySource")
            .field("aliases", &self.aliases)
            .field("current", &read_state(&self.state).current_id)
            .finish_non_exhaustive()
    }
}
