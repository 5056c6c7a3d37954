use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::HashError;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest of a file's bytes.
///
/// Used both to verify evidence integrity and as the idempotency key the
/// server deduplicates uploads on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Accept a stored or received digest; must be 64 hex characters
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(ContentHash(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// Stream a file through SHA-256.
///
/// A missing or unreadable file, an empty file, or a file whose length changes
/// while it is being read is an error: the capture is unusable and must never
/// be given an empty or partial hash.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
    let io_err = |source| HashError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let expected_len = file.metadata().map_err(io_err)?.len();
    if expected_len == 0 {
        return Err(HashError::Empty(path.to_path_buf()));
    }

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    let mut total: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(io_err)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    if total != expected_len {
        return Err(HashError::Truncated {
            path: path.to_path_buf(),
            expected: expected_len,
            actual: total,
        });
    }

    Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file on the blocking pool so large videos never stall async tasks
pub async fn hash_file_async(path: PathBuf) -> Result<ContentHash, HashError> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| HashError::Task(e.to_string()))?
}
