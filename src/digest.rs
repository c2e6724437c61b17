//! Content digests of the form `<algorithm>:<hex>`.

use core::{fmt, str::FromStr};

use sha2::{Digest as _, Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid digest {0:?}: missing algorithm separator")]
    MissingSeparator(String),
    #[error("invalid digest {0:?}: unsupported algorithm")]
    UnsupportedAlgorithm(String),
    #[error("invalid digest {digest:?}: expected {expected} hex characters")]
    InvalidLength { digest: String, expected: usize },
    #[error("invalid digest {0:?}: hex must be lowercase [0-9a-f]")]
    InvalidHex(String),
}

/// The hash algorithms accepted in a digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Number of hex characters in an encoded digest of this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn hash_hex(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(data)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl FromStr for Algorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(()),
        }
    }
}

/// A validated content digest.
///
/// The canonical form is always `<algorithm>:<lowercase hex>`, so two digests are equal exactly
/// when their string forms are.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub fn new(digest: &str) -> Result<Self, DigestError> {
        let Some((algorithm, hex)) = digest.split_once(':') else {
            return Err(DigestError::MissingSeparator(digest.to_string()));
        };
        let algorithm: Algorithm = algorithm
            .parse()
            .map_err(|()| DigestError::UnsupportedAlgorithm(digest.to_string()))?;

        if hex.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength {
                digest: digest.to_string(),
                expected: algorithm.hex_len(),
            });
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(DigestError::InvalidHex(digest.to_string()));
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Computes the sha256 digest of some bytes.
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(Algorithm::Sha256, data)
    }

    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        Digest {
            algorithm,
            hex: algorithm.hash_hex(data),
        }
    }

    /// Checks that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm.hash_hex(data) == self.hex
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::new(s)
    }
}

impl TryFrom<&oci_spec::image::Digest> for Digest {
    type Error = DigestError;

    fn try_from(value: &oci_spec::image::Digest) -> Result<Self, Self::Error> {
        Digest::new(value.as_ref())
    }
}

impl PartialEq<oci_spec::image::Digest> for Digest {
    fn eq(&self, other: &oci_spec::image::Digest) -> bool {
        let other: &str = other.as_ref();
        other == self.to_string()
    }
}
