//! Hashing utilities for drift detection.
//!
//! Every hash produced here is a SHA-256 digest, truncated to a fixed number of
//! bytes, hex-encoded and prefixed with `sha256:`:
//!
//! - definition hashes keep [`DEFINITION_HASH_BYTES`] bytes (16 hex chars)
//! - configuration hashes keep [`CONFIG_HASH_BYTES`] bytes (32 hex chars)
//! - file hashes keep the full digest

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::consts::{CONFIG_HASH_BYTES, DEFINITION_HASH_BYTES, HASH_PREFIX};

pub type HashError = serde_json::Error;

/// Hash `data` and keep the first `bytes` bytes of the digest.
pub fn truncated_digest(data: &[u8], bytes: usize) -> String {
  let digest = Sha256::digest(data);
  let keep = bytes.min(digest.len());
  format!("{}{}", HASH_PREFIX, hex::encode(&digest[..keep]))
}

/// Hash the JSON serialization of `value`, keeping `bytes` digest bytes.
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T, bytes: usize) -> Result<String, HashError> {
  let serialized = serde_json::to_vec(value)?;
  Ok(truncated_digest(&serialized, bytes))
}

/// Content hash of a service definition.
pub fn definition_hash<T: Serialize + ?Sized>(definition: &T) -> Result<String, HashError> {
  hash_serialized(definition, DEFINITION_HASH_BYTES)
}

/// Hash of a user configuration, used to detect configuration drift.
pub fn config_hash<T: Serialize + ?Sized>(config: &T) -> Result<String, HashError> {
  hash_serialized(config, CONFIG_HASH_BYTES)
}

/// Hash a file's contents with the full digest.
pub fn hash_file(path: &Path) -> io::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize())))
}
