//! Single-pass content digests.
//!
//! SHA-256 is always computed and becomes the document's content hash.
//! With `extra_digests` enabled, SHA-1, SHA-512, MD5 and CRC32 are computed in the
//! same pass and stored in the document metadata under `digests`.

use serde_json::{json, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

struct ExtraDigests {
    sha1: Sha1,
    sha512: Sha512,
    md5: md5::Context,
    crc32: flate2::Crc,
}

pub struct ContentHasher {
    sha256: Sha256,
    extra: Option<ExtraDigests>,
}

/// Finished digests for one piece of content.
#[derive(Debug, Clone)]
pub struct ContentDigests {
    pub sha256: String,
    /// `{"sha1": .., "sha512": .., "md5": .., "crc32": ..}` when extra digests were requested.
    pub extra: Option<Value>,
}

impl ContentHasher {
    pub fn new(extra_digests: bool) -> Self {
        Self {
            sha256: Sha256::new(),
            extra: extra_digests.then(|| ExtraDigests {
                sha1: Sha1::new(),
                sha512: Sha512::new(),
                md5: md5::Context::new(),
                crc32: flate2::Crc::new(),
            }),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.sha256.update(bytes);
        if let Some(extra) = self.extra.as_mut() {
            extra.sha1.update(bytes);
            extra.sha512.update(bytes);
            extra.md5.consume(bytes);
            extra.crc32.update(bytes);
        }
    }

    pub fn finish(self) -> ContentDigests {
        let extra = self.extra.map(|e| {
            json!({
                "sha1": hex::encode(e.sha1.finalize()),
                "sha512": hex::encode(e.sha512.finalize()),
                "md5": format!("{:x}", e.md5.compute()),
                "crc32": format!("{:08x}", e.crc32.sum()),
            })
        });
        ContentDigests {
            sha256: hex::encode(self.sha256.finalize()),
            extra,
        }
    }
}

/// Digest an in-memory buffer.
pub fn digest_bytes(bytes: &[u8], extra_digests: bool) -> ContentDigests {
    let mut hasher = ContentHasher::new(extra_digests);
    hasher.update(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let d = digest_bytes(b"abc", true);
        assert_eq!(
            d.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let extra = d.extra.unwrap();
        assert_eq!(extra["sha1"], "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            extra["sha512"],
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
        assert_eq!(extra["md5"], "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(extra["crc32"], "352441c2");
    }

    #[test]
    fn chunked_updates_match_single_pass() {
        let mut hasher = ContentHasher::new(false);
        hasher.update(b"hello ");
        hasher.update(b"world");
        let chunked = hasher.finish();
        assert_eq!(chunked.sha256, digest_bytes(b"hello world", false).sha256);
        assert!(chunked.extra.is_none());
    }
}
