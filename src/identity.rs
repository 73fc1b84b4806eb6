//! Secret and lock-key derivation for thumbnail descriptors.
//!
//! The secret authenticates a thumbnail request: only a holder of the server
//! key can produce it, so a URL carrying a valid secret was issued by us.
//!
//! - **Key material**: SHA-256 of the source path and the server key. Salting
//!   with the source means a secret can never be replayed against another
//!   source, even if the remaining fields collide.
//! - **Message**: `source-size-method-extension`, where size is always the
//!   normalized `WxH` rendering.
//! - **Secret**: lowercase hex HMAC-SHA256 of the message.
//!
//! Verification decodes the presented secret and compares MACs in constant
//! time ([`Mac::verify_slice`]).

use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(source: &str, size: &str, method: &str, extension: &str, server_key: &str) -> HmacSha256 {
    let mut salt = Sha256::new();
    salt.update(source.as_bytes());
    salt.update(b"\0");
    salt.update(server_key.as_bytes());
    let key = salt.finalize();

    // The digest fits in one block; HMAC zero-pads short keys the same way.
    let mut block = Key::<HmacSha256>::default();
    block[..key.len()].copy_from_slice(&key);
    let mut mac = <HmacSha256 as KeyInit>::new(&block);
    mac.update([source, size, method, extension].join("-").as_bytes());
    mac
}

/// Keyed one-way hash over the descriptor fields, as lowercase hex (64 chars).
pub fn derive_secret(
    source: &str,
    size: &str,
    method: &str,
    extension: &str,
    server_key: &str,
) -> String {
    let mac = keyed_mac(source, size, method, extension, server_key);
    hex::encode(mac.finalize().into_bytes())
}

/// Lock/cache namespace key for a secret.
pub fn derive_key(secret: &str, prefix: &str) -> String {
    format!("{prefix}-{secret}")
}

/// Check a presented secret against the fields in constant time.
///
/// Anything that is not valid hex is rejected without computing a MAC
/// comparison.
pub fn verify_secret(
    candidate: &str,
    source: &str,
    size: &str,
    method: &str,
    extension: &str,
    server_key: &str,
) -> bool {
    let Ok(bytes) = hex::decode(candidate) else {
        return false;
    };
    keyed_mac(source, size, method, extension, server_key)
        .verify_slice(&bytes)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "server-key";

    fn secret() -> String {
        derive_secret("animals/kitten.jpg", "100x100", "crop", ".jpg", KEY)
    }

    #[test]
    fn padded_block_key_matches_slice_key() {
        let mut salt = Sha256::new();
        salt.update(b"animals/kitten.jpg\0server-key");
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&salt.finalize()).unwrap();
        mac.update(b"animals/kitten.jpg-100x100-crop-.jpg");
        assert_eq!(secret(), hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn secret_is_deterministic() {
        assert_eq!(secret(), secret());
        assert_eq!(secret().len(), 64);
        assert!(secret().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn secret_changes_with_every_field() {
        let base = secret();
        let variants = [
            derive_secret("animals/puppy.jpg", "100x100", "crop", ".jpg", KEY),
            derive_secret("animals/kitten.jpg", "100x0", "crop", ".jpg", KEY),
            derive_secret("animals/kitten.jpg", "100x100", "smart", ".jpg", KEY),
            derive_secret("animals/kitten.jpg", "100x100", "crop", ".png", KEY),
            derive_secret("animals/kitten.jpg", "100x100", "crop", ".jpg", "other-key"),
        ];
        for v in variants {
            assert_ne!(v, base);
        }
    }

    #[test]
    fn source_is_part_of_the_key_material() {
        // Same joined message, different split between source and size.
        let a = derive_secret("a-1", "2x3", "crop", ".jpg", KEY);
        let b = derive_secret("a", "1-2x3", "crop", ".jpg", KEY);
        assert_ne!(a, b);
    }

    #[test]
    fn key_is_prefixed_secret() {
        assert_eq!(derive_key("abc123", "lazythumbs"), "lazythumbs-abc123");
    }

    #[test]
    fn verify_accepts_matching_secret() {
        assert!(verify_secret(
            &secret(),
            "animals/kitten.jpg",
            "100x100",
            "crop",
            ".jpg",
            KEY
        ));
    }

    #[test]
    fn verify_rejects_wrong_or_garbage_secret() {
        let other = derive_secret("animals/kitten.jpg", "100x100", "scale", ".jpg", KEY);
        assert!(!verify_secret(&other, "animals/kitten.jpg", "100x100", "crop", ".jpg", KEY));
        assert!(!verify_secret("derp", "animals/kitten.jpg", "100x100", "crop", ".jpg", KEY));
        assert!(!verify_secret("", "animals/kitten.jpg", "100x100", "crop", ".jpg", KEY));
    }
}
