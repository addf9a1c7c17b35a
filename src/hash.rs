// src/hash.rs

//! Hashing for distfile integrity and recipe change detection
//!
//! This module provides a unified interface for the digests used by kits:
//! - **SHA-512**: mandatory Manifest digest, authoritative for distfiles
//! - **BLAKE2B**: optional Manifest digest (BLAKE2b-512)
//! - **MD5**: ebuild checksums in kit caches and object store ETags
//! - **SHA-256**: crate checksums of `Cargo.lock`
//!
//! | Use Case | Algorithm |
//! |----------|-----------|
//! | Manifest `DIST` entries | SHA-512 + BLAKE2B |
//! | "same version, changed recipe" detection | MD5 |
//! | Object store comparison | MD5 (ETag) |

use blake2::Blake2b512;
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha512,
    Blake2b,
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha512 => 64,
            Self::Blake2b => 64,
            Self::Md5 => 16,
            Self::Sha256 => 32,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Key used in kit cache `hashes` maps
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Blake2b => "blake2b",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Tag used on Manifest lines
    #[inline]
    pub const fn manifest_tag(&self) -> &'static str {
        match self {
            Self::Sha512 => "SHA512",
            Self::Blake2b => "BLAKE2B",
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "blake2b" | "blake2b512" => Ok(Self::Blake2b),
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash computation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
        }
    }
}

impl std::error::Error for HashError {}

/// Hasher that can compute several digests in a single pass
pub struct Hasher {
    states: Vec<HasherState>,
    size: u64,
}

enum HasherState {
    Sha512(Sha512),
    Blake2b(Blake2b512),
    Md5(Md5),
    Sha256(Sha256),
}

impl HasherState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake2b => Self::Blake2b(Blake2b512::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha512(h) => h.update(data),
            Self::Blake2b(h) => h.update(data),
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> (HashAlgorithm, String) {
        match self {
            Self::Sha512(h) => (HashAlgorithm::Sha512, hex::encode(h.finalize())),
            Self::Blake2b(h) => (HashAlgorithm::Blake2b, hex::encode(h.finalize())),
            Self::Md5(h) => (HashAlgorithm::Md5, hex::encode(h.finalize())),
            Self::Sha256(h) => (HashAlgorithm::Sha256, hex::encode(h.finalize())),
        }
    }
}

/// Size and digests of one file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDigests {
    pub size: u64,
    pub hashes: BTreeMap<HashAlgorithm, String>,
}

impl FileDigests {
    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.hashes.get(&algorithm).map(String::as_str)
    }

    /// Digests keyed by cache name (`sha512`, `blake2b`, ...)
    pub fn to_named(&self) -> BTreeMap<String, String> {
        self.hashes
            .iter()
            .map(|(algo, value)| (algo.name().to_string(), value.clone()))
            .collect()
    }
}

impl Hasher {
    /// Create a hasher computing every algorithm in `algorithms`
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        Self {
            states: algorithms.iter().map(|a| HasherState::new(*a)).collect(),
            size: 0,
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        for state in &mut self.states {
            state.update(data);
        }
    }

    /// Finalize and return every digest
    pub fn finalize(self) -> FileDigests {
        FileDigests {
            size: self.size,
            hashes: self.states.into_iter().map(HasherState::finalize).collect(),
        }
    }
}

/// The digests written on Manifest lines
pub const MANIFEST_ALGORITHMS: [HashAlgorithm; 2] = [HashAlgorithm::Blake2b, HashAlgorithm::Sha512];

/// Compute hash of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(&[algorithm]);
    hasher.update(data);
    hasher
        .finalize()
        .hashes
        .remove(&algorithm)
        .unwrap_or_default()
}

/// Compute digests of data from a reader
pub fn hash_reader<R: Read>(algorithms: &[HashAlgorithm], reader: &mut R) -> io::Result<FileDigests> {
    let mut hasher = Hasher::new(algorithms);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute digests of a file, streaming its content
pub fn hash_file(path: &Path, algorithms: &[HashAlgorithm]) -> io::Result<FileDigests> {
    let mut file = File::open(path)?;
    hash_reader(algorithms, &mut file)
}

/// MD5 of a file (used for ebuild and `files/` change detection)
pub fn md5_file(path: &Path) -> io::Result<String> {
    let digests = hash_file(path, &[HashAlgorithm::Md5])?;
    Ok(digests.get(HashAlgorithm::Md5).unwrap_or_default().to_string())
}

/// Compute MD5 (convenience function)
#[inline]
pub fn md5(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Md5, data)
}

// =============================================================================
// Verification functions
// =============================================================================

/// Verification result error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    Size { expected: u64, actual: u64 },
    Digest {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { expected, actual } => {
                write!(f, "size mismatch: expected {}, got {}", expected, actual)
            }
            Self::Digest {
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "{} mismatch: expected {}, got {}",
                algorithm, expected, actual
            ),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Compare computed digests against the authoritative ones
///
/// `expected` is keyed by cache name; unknown algorithms are ignored and
/// only algorithms present in both sides are compared.
pub fn verify_digests(
    digests: &FileDigests,
    expected_size: Option<u64>,
    expected: &BTreeMap<String, String>,
) -> Result<(), VerifyError> {
    if let Some(size) = expected_size
        && size != digests.size
    {
        return Err(VerifyError::Size {
            expected: size,
            actual: digests.size,
        });
    }

    for (name, value) in expected {
        let Ok(algorithm) = name.parse::<HashAlgorithm>() else {
            continue;
        };
        if let Some(actual) = digests.get(algorithm)
            && actual != value.to_lowercase()
        {
            return Err(VerifyError::Digest {
                algorithm,
                expected: value.clone(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_value() {
        assert_eq!(md5(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_sha512_length() {
        let hash = hash_bytes(HashAlgorithm::Sha512, b"Hello, World!");
        assert_eq!(hash.len(), HashAlgorithm::Sha512.hex_len());
    }

    #[test]
    fn test_blake2b_length() {
        let hash = hash_bytes(HashAlgorithm::Blake2b, b"Hello, World!");
        assert_eq!(hash.len(), 128);
    }

    #[test]
    fn test_hasher_multi_single_pass() {
        let data = b"distfile content";
        let mut hasher = Hasher::new(&MANIFEST_ALGORITHMS);
        hasher.update(b"distfile ");
        hasher.update(b"content");
        let digests = hasher.finalize();

        assert_eq!(digests.size, data.len() as u64);
        assert_eq!(
            digests.get(HashAlgorithm::Sha512).unwrap(),
            hash_bytes(HashAlgorithm::Sha512, data)
        );
        assert_eq!(
            digests.get(HashAlgorithm::Blake2b).unwrap(),
            hash_bytes(HashAlgorithm::Blake2b, data)
        );
        assert!(digests.get(HashAlgorithm::Md5).is_none());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert_eq!("blake2b".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake2b);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.tar.gz");
        std::fs::write(&path, b"hello world").unwrap();

        let digests = hash_file(&path, &[HashAlgorithm::Md5]).unwrap();
        assert_eq!(digests.size, 11);
        assert_eq!(md5_file(&path).unwrap(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_verify_digests() {
        let mut hasher = Hasher::new(&MANIFEST_ALGORITHMS);
        hasher.update(b"data");
        let digests = hasher.finalize();

        let mut expected = digests.to_named();
        assert!(verify_digests(&digests, Some(4), &expected).is_ok());
        assert!(matches!(
            verify_digests(&digests, Some(5), &expected),
            Err(VerifyError::Size { expected: 5, actual: 4 })
        ));

        expected.insert("sha512".to_string(), "00".repeat(64));
        assert!(matches!(
            verify_digests(&digests, None, &expected),
            Err(VerifyError::Digest { algorithm: HashAlgorithm::Sha512, .. })
        ));
    }

    #[test]
    fn test_verify_ignores_unknown_and_absent() {
        let digests = hash_reader(&[HashAlgorithm::Sha512], &mut &b"x"[..]).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("rmd160".to_string(), "abc".to_string());
        expected.insert("blake2b".to_string(), "abc".to_string());
        assert!(verify_digests(&digests, None, &expected).is_ok());
    }
}
