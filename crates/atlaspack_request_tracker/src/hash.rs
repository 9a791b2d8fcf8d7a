use std::hash::Hasher;

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::Xxh3;

/// Hasher used for every identifier that ends up in the request graph cache.
///
/// Content keys, option hashes and cache keys are written to disk and compared on the
/// next run, so these hashes must be stable across runs, machines, platforms and versions.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: impl AsRef<str>) -> String {
  hash_bytes(s.as_ref().as_bytes())
}

pub fn hash_bytes(s: &[u8]) -> String {
  let res = xxh3_64(s);
  format!("{:016x}", res)
}

/// Formats the current state of a hasher the same way [`hash_bytes`] does
pub fn finish_hex(hasher: &IdentifierHasher) -> String {
  format!("{:016x}", hasher.finish())
}
