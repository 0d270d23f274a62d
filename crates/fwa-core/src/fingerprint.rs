//! # Cache Fingerprints
//!
//! A [`CacheFingerprint`] identifies "this operation with these arguments".
//! It is the key into the keyed lock table and into the result caches, so
//! two calls collapse into one computation exactly when their fingerprints
//! are equal.
//!
//! ## Encoding
//!
//! Each element written to a [`FingerprintBuilder`] is framed as
//! `tag (1 byte) ‖ length (u64 LE) ‖ payload`, then fed into a BLAKE3 and a
//! SHA-512 hasher. The framing makes the encoding prefix-free: element
//! boundaries are part of the hashed data.
//!
//! The fingerprint is BLAKE3-512 ‖ SHA-512 of the framed stream.

use sha2::{Digest, Sha512};

use crate::content_id::ContentId;

const FINGERPRINT_LEN: usize = 128;

const TAG_BYTES: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_U64: u8 = 0x03;
const TAG_I64: u8 = 0x04;
const TAG_BOOL: u8 = 0x05;
const TAG_NONE: u8 = 0x06;
const TAG_SOME: u8 = 0x07;

/// Deterministic key derived from an operation name and its arguments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheFingerprint([u8; FINGERPRINT_LEN]);

impl CacheFingerprint {
    /// Fingerprint an operation that takes a single argument.
    ///
    /// Convenience for the common `(name, arg)` shape.
    pub fn of<T: Fingerprintable + ?Sized>(operation: &str, arg: &T) -> Self {
        let mut b = FingerprintBuilder::new(operation);
        b.write(arg);
        b.finish()
    }

    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Debug for CacheFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheFingerprint({}…)", self.short())
    }
}

impl std::fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Values that can be written into a fingerprint.
///
/// Implementations must be deterministic: equal values write identical
/// element streams.
pub trait Fingerprintable {
    /// Write this value's elements into the builder.
    fn write_fingerprint(&self, b: &mut FingerprintBuilder);
}

/// Incremental fingerprint builder.
pub struct FingerprintBuilder {
    blake3: blake3::Hasher,
    sha512: Sha512,
}

impl FingerprintBuilder {
    /// Start a fingerprint for the named operation.
    pub fn new(operation: &str) -> Self {
        let mut b = Self {
            blake3: blake3::Hasher::new(),
            sha512: Sha512::new(),
        };
        b.write_str(operation);
        b
    }

    fn frame(&mut self, tag: u8, payload: &[u8]) {
        let len = (payload.len() as u64).to_le_bytes();
        for chunk in [&[tag][..], &len[..], payload] {
            self.blake3.update(chunk);
            self.sha512.update(chunk);
        }
    }

    /// Write any fingerprintable value.
    pub fn write<T: Fingerprintable + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.write_fingerprint(self);
        self
    }

    /// Write a byte string.
    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.frame(TAG_BYTES, v);
        self
    }

    /// Write a UTF-8 string.
    pub fn write_str(&mut self, v: &str) -> &mut Self {
        self.frame(TAG_STR, v.as_bytes());
        self
    }

    /// Write an unsigned integer.
    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.frame(TAG_U64, &v.to_le_bytes());
        self
    }

    /// Write a signed integer.
    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.frame(TAG_I64, &v.to_le_bytes());
        self
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.frame(TAG_BOOL, &[v as u8]);
        self
    }

    /// Consume the builder and produce the fingerprint.
    pub fn finish(self) -> CacheFingerprint {
        let mut out = [0u8; FINGERPRINT_LEN];
        self.blake3.finalize_xof().fill(&mut out[..64]);
        out[64..].copy_from_slice(&self.sha512.finalize());
        CacheFingerprint(out)
    }
}

impl Fingerprintable for str {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_str(self);
    }
}

impl Fingerprintable for String {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_str(self);
    }
}

impl Fingerprintable for [u8] {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_bytes(self);
    }
}

impl Fingerprintable for Vec<u8> {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_bytes(self);
    }
}

impl Fingerprintable for u64 {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_u64(*self);
    }
}

impl Fingerprintable for u32 {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_u64(u64::from(*self));
    }
}

impl Fingerprintable for i64 {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_i64(*self);
    }
}

impl Fingerprintable for bool {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_bool(*self);
    }
}

impl Fingerprintable for ContentId {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        b.write_bytes(self.as_bytes());
    }
}

impl<T: Fingerprintable> Fingerprintable for Option<T> {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        match self {
            None => {
                b.frame(TAG_NONE, &[]);
            }
            Some(v) => {
                b.frame(TAG_SOME, &[]);
                v.write_fingerprint(b);
            }
        }
    }
}

impl<T: Fingerprintable + ?Sized> Fingerprintable for &T {
    fn write_fingerprint(&self, b: &mut FingerprintBuilder) {
        (**self).write_fingerprint(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_operation_same_args_equal() {
        let a = CacheFingerprint::of("GetByVersion", "1.2.3");
        let b = CacheFingerprint::of("GetByVersion", "1.2.3");
        assert_eq!(a, b);
    }

    #[test]
    fn test_operation_name_participates() {
        let a = CacheFingerprint::of("GetByVersion", "1.2.3");
        let b = CacheFingerprint::of("GetByFilename", "1.2.3");
        assert_ne!(a, b);
    }

    #[test]
    fn test_element_boundaries_are_framed() {
        let mut a = FingerprintBuilder::new("op");
        a.write_str("ab").write_str("c");
        let mut b = FingerprintBuilder::new("op");
        b.write_str("a").write_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_str_and_bytes_are_distinct() {
        let a = CacheFingerprint::of("op", "abc");
        let b = CacheFingerprint::of("op", &b"abc"[..]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_option_none_differs_from_empty() {
        let none: Option<String> = None;
        let empty = Some(String::new());
        assert_ne!(
            CacheFingerprint::of("op", &none),
            CacheFingerprint::of("op", &empty)
        );
    }

    proptest! {
        #[test]
        fn prop_deterministic(name in "[a-zA-Z]{1,16}", arg in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(
                CacheFingerprint::of(&name, &arg[..]),
                CacheFingerprint::of(&name, &arg.clone()[..])
            );
        }
    }
}
