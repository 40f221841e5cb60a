//! Signing identity used to authorize chunk pushes
//!
//! An identity file names a user and stores an argon2 hash of the
//! passphrase plus a salt. Unlocking it verifies the passphrase and derives
//! a signing key; pushes carry a BLAKE3 keyed hash over the chunk.

use crate::common::{ChunkId, ChunkKind, Error, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Context string for signing-key derivation
const KEY_CONTEXT: &str = "chunkrep 2024-06 push signing key";

/// Salt length for key derivation
const KEY_SALT_LEN: usize = 16;

/// On-disk identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityFile {
    pub user: String,
    /// PHC string produced by argon2
    pub passphrase_hash: String,
    /// Hex salt mixed into the signing key
    pub key_salt: String,
}

/// Unlocked identity with the rights to write chunks
#[derive(Clone)]
pub struct SigningIdentity {
    user: String,
    key: [u8; 32],
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl IdentityFile {
    /// Create a new identity record for `user` protected by `passphrase`
    pub fn generate(user: &str, passphrase: &str) -> Result<Self> {
        if user.is_empty() {
            return Err(Error::Identity("user cannot be empty".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let passphrase_hash = Argon2::default()
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| Error::Identity(e.to_string()))?
            .to_string();
        let key_salt: [u8; KEY_SALT_LEN] = rand::thread_rng().gen();

        Ok(Self {
            user: user.to_string(),
            passphrase_hash,
            key_salt: hex::encode(key_salt),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            Error::Identity(format!("cannot read identity file {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            Error::Identity(format!("malformed identity file {}: {}", path.display(), e))
        })
    }

    /// Write to a new file; refuses to overwrite an existing one
    pub fn save(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let json = serde_json::to_vec_pretty(self)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Verify the passphrase and derive the signing key
    pub fn unlock(&self, passphrase: &str) -> Result<SigningIdentity> {
        let parsed = PasswordHash::new(&self.passphrase_hash)
            .map_err(|e| Error::Identity(format!("bad passphrase hash: {}", e)))?;
        Argon2::default()
            .verify_password(passphrase.as_bytes(), &parsed)
            .map_err(|_| Error::Identity("passphrase does not match identity".into()))?;

        let salt = hex::decode(&self.key_salt)
            .map_err(|e| Error::Identity(format!("bad key salt: {}", e)))?;
        let mut material = Vec::with_capacity(passphrase.len() + salt.len());
        material.extend_from_slice(passphrase.as_bytes());
        material.extend_from_slice(&salt);

        Ok(SigningIdentity {
            user: self.user.clone(),
            key: blake3::derive_key(KEY_CONTEXT, &material),
        })
    }
}

impl SigningIdentity {
    /// Load an identity file and unlock it
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        IdentityFile::load(path)?.unlock(passphrase)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Hex signature over a push of `data` as chunk `id` of `kind`
    pub fn sign_push(&self, kind: ChunkKind, id: &ChunkId, data: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(kind.as_str().as_bytes());
        hasher.update(id.hash());
        hasher.update(data);
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_save_and_unlock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id.json");

        IdentityFile::generate("operator", "hunter2")
            .unwrap()
            .save(&path)
            .unwrap();

        let identity = SigningIdentity::open(&path, "hunter2").unwrap();
        assert_eq!(identity.user(), "operator");
    }

    #[test]
    fn test_wrong_passphrase() {
        let file = IdentityFile::generate("operator", "hunter2").unwrap();
        assert!(matches!(file.unlock("hunter3"), Err(Error::Identity(_))));
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id.json");
        let file = IdentityFile::generate("operator", "pw").unwrap();
        file.save(&path).unwrap();
        assert!(file.save(&path).is_err());
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(IdentityFile::load(&path), Err(Error::Identity(_))));
    }

    #[test]
    fn test_signature_depends_on_content_and_kind() {
        let identity = IdentityFile::generate("operator", "pw")
            .unwrap()
            .unlock("pw")
            .unwrap();
        let id = ChunkId::for_bytes(b"payload");

        let data_sig = identity.sign_push(ChunkKind::Data, &id, b"payload");
        assert_eq!(data_sig, identity.sign_push(ChunkKind::Data, &id, b"payload"));
        assert_ne!(data_sig, identity.sign_push(ChunkKind::Meta, &id, b"payload"));
        assert_ne!(data_sig, identity.sign_push(ChunkKind::Data, &id, b"other"));
        assert_eq!(data_sig.len(), 64);
    }
}
