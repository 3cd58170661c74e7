// 🔑 Derived resource keys
// For warehouse rows whose source carries no natural identifier

use sha2::{Digest, Sha256};

/// Stable key over a row's identifying fields plus the extraction timestamp
///
/// Each field is framed before hashing: a tag byte (absent vs present), then
/// for present fields the byte length and the bytes. Field contents can
/// therefore never shift a boundary, and `None` differs from `Some("")`.
pub fn derived_key(parts: &[Option<String>], extraction_ts: &str) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        match part {
            None => hasher.update([0u8]),
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
        }
    }
    hasher.update((extraction_ts.len() as u64).to_le_bytes());
    hasher.update(extraction_ts.as_bytes());
    format!("{:x}", hasher.finalize())
}
