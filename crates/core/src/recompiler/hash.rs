//! Content-addressing: the cache key a compiled [`ModulePart`] is cached
//! under.

use sha1::{Digest, Sha1};

use crate::recompiler::partition::ModulePart;

/// Computes the object-cache file name for `part`: `"b1" + name + "-" +
/// the first 8 bytes of its SHA-1 digest, formatted as 16 uppercase hex
/// digits + ".obj"`.
///
/// The hash covers, for every function in the part in order, its address,
/// its size, and its raw instruction bytes. Any change to guest code
/// produces a different name, so a stale object can never be mistaken for
/// a fresh one. A function's TOC is not part of the key: the same code
/// compiled for two different TOC values is still the same object, and the
/// TOC is checked separately at call time by the TOC-check handler.
#[must_use]
pub fn object_cache_name(part: &ModulePart) -> String {
    format!("b1{}-{:016X}.obj", part.name, cache_key(part))
}

fn cache_key(part: &ModulePart) -> u64 {
    let digest = part_digest(part);
    u64::from_be_bytes(digest[0..8].try_into().expect("digest has at least 8 bytes"))
}

fn part_digest(part: &ModulePart) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for function in &part.functions {
        hasher.update(function.addr.to_be_bytes());
        hasher.update(function.size.to_be_bytes());
        hasher.update(&function.instructions);
    }
    hasher.finalize().into()
}
