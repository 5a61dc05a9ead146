use ahash::AHasher;
use bytes::Bytes;
use http::HeaderMap;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use xxhash_rust::xxh3::Xxh3;

/// Identifies a data source call for in-flight deduplication.
///
/// `source_id` is the address of the data source instance, so two plans pointing at the same
/// connector share calls while distinct connectors never do.
pub fn call_fingerprint(
    source_id: usize,
    input: &[u8],
    req_headers: &HeaderMap,
    fingerprint_headers: &[String],
) -> u64 {
    // xxh3 instead of AHasher: fingerprints must be stable between processes.
    let mut hasher = Xxh3::new();

    source_id.hash(&mut hasher);
    input.hash(&mut hasher);
    for name in fingerprint_headers {
        for value in req_headers.get_all(name.as_str()) {
            name.hash(&mut hasher);
            value.as_bytes().hash(&mut hasher);
        }
    }

    hasher.finish()
}

/// Hash of a rendered input, used to dedupe item inputs inside a single loader dispatch.
pub fn input_hash(input: &Bytes) -> u64 {
    let mut hasher = Xxh3::new();
    input.as_ref().hash(&mut hasher);
    hasher.finish()
}

pub type ABuildHasher = BuildHasherDefault<AHasher>;
