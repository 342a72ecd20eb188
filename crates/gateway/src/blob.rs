use std::path::Path;

use sled::Db;
use thiserror::Error;

use crate::crypto::{BlobCipher, CryptoError};

const USED_BYTES_KEY: &[u8] = b"__meta:used_bytes";
const OBJECT_PREFIX: &str = "obj:";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("object could not be sealed or opened: {0}")]
    Crypto(#[from] CryptoError),
}

/// Bucketed object storage for uploaded record files, encrypted at rest.
///
/// Uploads never overwrite: a second write to the same path fails, which
/// matches the upload semantics the portal's paths are designed around
/// (every path carries its upload timestamp).
pub struct BlobStore {
    db: Db,
    cipher: BlobCipher,
}

impl BlobStore {
    pub fn open(storage_path: &Path, secret: &str) -> Result<Self, BlobError> {
        let db = sled::open(storage_path)?;
        let store = Self {
            db,
            cipher: BlobCipher::new(secret),
        };
        tracing::info!(
            "Blob store opened at {}. Stored: {} bytes (encrypted).",
            storage_path.display(),
            store.used_bytes()
        );
        Ok(store)
    }

    /// A throwaway store that disappears when dropped.
    pub fn temporary(secret: &str) -> Result<Self, BlobError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            cipher: BlobCipher::new(secret),
        })
    }

    pub fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<(), BlobError> {
        let key = object_key(bucket, path);
        let sealed = self.cipher.seal(data)?;
        let sealed_len = sealed.len() as u64;

        let swapped = self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(sealed))?;
        if swapped.is_err() {
            return Err(BlobError::AlreadyExists(format!("{}/{}", bucket, path)));
        }

        self.adjust_used_bytes(|used| used.saturating_add(sealed_len))?;
        Ok(())
    }

    pub fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BlobError> {
        let Some(sealed) = self.db.get(object_key(bucket, path))? else {
            return Err(BlobError::NotFound(format!("{}/{}", bucket, path)));
        };
        Ok(self.cipher.open(&sealed)?)
    }

    /// Returns `false` when nothing was stored at `path`.
    pub fn remove(&self, bucket: &str, path: &str) -> Result<bool, BlobError> {
        match self.db.remove(object_key(bucket, path))? {
            Some(old) => {
                let freed = old.len() as u64;
                self.adjust_used_bytes(|used| used.saturating_sub(freed))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn exists(&self, bucket: &str, path: &str) -> Result<bool, BlobError> {
        Ok(self.db.contains_key(object_key(bucket, path))?)
    }

    pub fn used_bytes(&self) -> u64 {
        self.db
            .get(USED_BYTES_KEY)
            .ok()
            .flatten()
            .map(|v| decode_counter(&v))
            .unwrap_or(0)
    }

    fn adjust_used_bytes<F>(&self, f: F) -> Result<(), BlobError>
    where
        F: Fn(u64) -> u64,
    {
        self.db.update_and_fetch(USED_BYTES_KEY, |old| {
            let current = old.map(decode_counter).unwrap_or(0);
            Some(f(current).to_le_bytes().to_vec())
        })?;
        Ok(())
    }
}

fn object_key(bucket: &str, path: &str) -> String {
    format!("{OBJECT_PREFIX}{bucket}/{}", path.trim_start_matches('/'))
}

fn decode_counter(raw: &[u8]) -> u64 {
    if raw.len() != 8 {
        return 0;
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(raw);
    u64::from_le_bytes(arr)
}
