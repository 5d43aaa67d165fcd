//! Credential-bound export job ids.
//!
//! A job id ends with an HMAC of the dataset and the caller's credential, so
//! only the caller that started an export can poll it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub struct JobIdIssuer {
    secret: Vec<u8>,
    sequence: AtomicU64,
}

impl JobIdIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Generate a random secret key.
    pub fn generate_secret() -> Vec<u8> {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let state = RandomState::new();
        let mut bytes = Vec::with_capacity(32);
        for i in 0..4u64 {
            let mut hasher = state.build_hasher();
            hasher.write_u64(i);
            bytes.extend_from_slice(&hasher.finish().to_le_bytes());
        }
        bytes
    }

    /// New id: creation millis, a per-process sequence number, then the digest.
    pub fn issue(&self, dataset: &str, credential: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}{:04}{}", millis, seq % 10_000, self.digest(dataset, credential))
    }

    pub fn owns(&self, job_id: &str, dataset: &str, credential: &str) -> bool {
        job_id.ends_with(&self.digest(dataset, credential))
    }

    fn digest(&self, dataset: &str, credential: &str) -> String {
        let message = format!("{}__{}", dataset, credential);

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());

        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
