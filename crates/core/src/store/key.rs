//! Request identity used to address cache entries.

use sha2::{Digest, Sha256};
use url::Url;

/// Compute the storage key for a request: method plus canonical URL.
pub fn request_key(method: &str, url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
