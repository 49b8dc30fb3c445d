use std::{collections::BTreeMap, fs, path::PathBuf, sync::Mutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::KeyValueStore;
use crate::errors::{GatewayError, Result};

const CURRENT_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;

/// JSON file store, optionally sealed with ChaCha20-Poly1305.
///
/// Every write rewrites the whole document; the store holds provider state,
/// not bulk data.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    encryption_key: Option<[u8; 32]>,
    lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Default)]
struct PlainEntries {
    version: u32,
    entries: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct SealedEntries {
    version: u32,
    nonce: String,
    ciphertext: String,
}

impl FileStore {
    /// Opens (lazily) the store at `path`. `encryption_key` is a base64 or
    /// 32-character ascii key; empty means plaintext.
    pub fn new(path: PathBuf, encryption_key: Option<&str>) -> Result<Self> {
        let key = match encryption_key {
            Some(value) if !value.trim().is_empty() => Some(decode_encryption_key(value)?),
            _ => None,
        };

        Ok(Self {
            path,
            encryption_key: key,
            lock: Mutex::new(()),
        })
    }

    fn with_entries<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| GatewayError::Store("File store lock poisoned".into()))?;
        let mut entries = self.load_locked()?;
        op(&mut entries);
        self.persist_locked(&entries)
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| GatewayError::Store("File store lock poisoned".into()))?;
        self.load_locked()
    }

    fn load_locked(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = fs::read(&self.path)?;
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }

        let value: serde_json::Value = serde_json::from_slice(&raw)?;

        if value.get("ciphertext").is_some() {
            let key = self.encryption_key.ok_or_else(|| {
                GatewayError::Store("An encryption key is required to open this state file".into())
            })?;
            let sealed: SealedEntries = serde_json::from_value(value)?;
            let nonce_bytes = BASE64
                .decode(sealed.nonce)
                .map_err(|e| GatewayError::Store(format!("Failed to decode nonce: {e}")))?;
            if nonce_bytes.len() != NONCE_LEN {
                return Err(GatewayError::Store(format!(
                    "Invalid nonce length in state file: expected {NONCE_LEN} bytes, got {}",
                    nonce_bytes.len()
                )));
            }
            let cipher_bytes = BASE64
                .decode(sealed.ciphertext)
                .map_err(|e| GatewayError::Store(format!("Failed to decode ciphertext: {e}")))?;

            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
            let nonce = Nonce::from_slice(&nonce_bytes);
            let plaintext = cipher
                .decrypt(nonce, cipher_bytes.as_ref())
                .map_err(|_| GatewayError::Store("Failed to decrypt state file".into()))?;
            let plain: PlainEntries = serde_json::from_slice(&plaintext)?;
            Ok(plain.entries)
        } else {
            let plain: PlainEntries = serde_json::from_value(value)?;
            Ok(plain.entries)
        }
    }

    fn persist_locked(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let plain = PlainEntries {
            version: CURRENT_VERSION,
            entries: entries.clone(),
        };

        let json = if let Some(key) = self.encryption_key {
            let serialized = serde_json::to_vec(&plain)?;
            let mut nonce_bytes = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce_bytes);
            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
            let nonce = Nonce::from_slice(&nonce_bytes);
            let ciphertext = cipher
                .encrypt(nonce, serialized.as_ref())
                .map_err(|_| GatewayError::Store("Failed to encrypt state".into()))?;
            serde_json::to_string_pretty(&SealedEntries {
                version: CURRENT_VERSION,
                nonce: BASE64.encode(nonce_bytes),
                ciphertext: BASE64.encode(ciphertext),
            })?
        } else {
            serde_json::to_string_pretty(&plain)?
        };

        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(key);
        })
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read_entries()?
            .into_keys()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

fn decode_encryption_key(raw: &str) -> Result<[u8; 32]> {
    let trimmed = raw.trim();
    let decoded = match BASE64.decode(trimmed) {
        Ok(bytes) => bytes,
        Err(_) if trimmed.len() == 32 => trimmed.as_bytes().to_vec(),
        Err(_) => {
            return Err(GatewayError::Config(
                "Encryption key must be a base64 string or 32-byte ascii value".into(),
            ))
        }
    };

    if decoded.len() != 32 {
        return Err(GatewayError::Config(
            "Encryption key must decode to exactly 32 bytes".into(),
        ));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_without_encryption() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state.json");
        let store = FileStore::new(file.clone(), None).unwrap();

        store.set("provider:alpha", "{\"id\":\"alpha\"}").unwrap();
        assert_eq!(
            store.get("provider:alpha").unwrap().as_deref(),
            Some("{\"id\":\"alpha\"}")
        );
        assert_eq!(store.keys("provider:").unwrap(), vec!["provider:alpha"]);

        store.delete("provider:alpha").unwrap();
        assert!(store.get("provider:alpha").unwrap().is_none());
        assert!(file.exists());
    }

    #[test]
    fn round_trip_with_encryption() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state.json");
        let key = BASE64.encode([7u8; 32]);
        let store = FileStore::new(file.clone(), Some(&key)).unwrap();

        store.set("credentials:beta", "secret").unwrap();
        assert_eq!(
            store.get("credentials:beta").unwrap().as_deref(),
            Some("secret")
        );

        let raw = fs::read_to_string(&file).unwrap();
        assert!(raw.contains("ciphertext"));
        assert!(!raw.contains("secret"));

        let reopened = FileStore::new(file, Some(&key)).unwrap();
        assert_eq!(
            reopened.get("credentials:beta").unwrap().as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn sealed_file_requires_key() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state.json");
        let key = BASE64.encode([3u8; 32]);
        FileStore::new(file.clone(), Some(&key))
            .unwrap()
            .set("a", "b")
            .unwrap();

        let unsealed = FileStore::new(file, None).unwrap();
        assert!(matches!(unsealed.get("a"), Err(GatewayError::Store(_))));
    }

    #[test]
    fn truncated_nonce_is_a_store_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state.json");
        let key = BASE64.encode([5u8; 32]);
        let store = FileStore::new(file.clone(), Some(&key)).unwrap();
        store.set("a", "b").unwrap();

        let mut sealed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        sealed["nonce"] = serde_json::Value::from(BASE64.encode([0u8; 4]));
        fs::write(&file, sealed.to_string()).unwrap();

        let reopened = FileStore::new(file, Some(&key)).unwrap();
        match reopened.get("a") {
            Err(GatewayError::Store(message)) => assert!(message.contains("nonce")),
            other => panic!("expected a store error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_short_key() {
        let dir = tempdir().unwrap();
        let result = FileStore::new(dir.path().join("s.json"), Some("short"));
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
