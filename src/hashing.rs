use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use sha3::Sha3_256;

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
  Md5,
  Sha1,
  Sha224,
  Sha256,
  Sha384,
  Sha512,
  Sha3_256,
}

impl HashAlgorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      HashAlgorithm::Md5 => "md5",
      HashAlgorithm::Sha1 => "sha1",
      HashAlgorithm::Sha224 => "sha224",
      HashAlgorithm::Sha256 => "sha256",
      HashAlgorithm::Sha384 => "sha384",
      HashAlgorithm::Sha512 => "sha512",
      HashAlgorithm::Sha3_256 => "sha3_256",
    }
  }

  /// Length of the lowercase hex digest.
  pub fn hex_len(&self) -> usize {
    match self {
      HashAlgorithm::Md5 => 32,
      HashAlgorithm::Sha1 => 40,
      HashAlgorithm::Sha224 => 56,
      HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 => 64,
      HashAlgorithm::Sha384 => 96,
      HashAlgorithm::Sha512 => 128,
    }
  }

  pub fn digest_hex(&self, input: &str) -> String {
    let bytes = input.as_bytes();
    match self {
      HashAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
      HashAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
      HashAlgorithm::Sha224 => hex::encode(Sha224::digest(bytes)),
      HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
      HashAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
      HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
      HashAlgorithm::Sha3_256 => hex::encode(Sha3_256::digest(bytes)),
    }
  }

  /// Lowercases `hash` and checks that it is a digest of this algorithm.
  pub fn normalize_target(&self, hash: &str) -> Result<String> {
    let normalized = hash.trim().to_ascii_lowercase();
    if normalized.len() != self.hex_len() || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(FleetError::InvalidArgument(format!(
        "{:?} is not a {} digest",
        hash, self
      )));
    }
    Ok(normalized)
  }
}

impl fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for HashAlgorithm {
  type Err = FleetError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "md5" => Ok(HashAlgorithm::Md5),
      "sha1" => Ok(HashAlgorithm::Sha1),
      "sha224" => Ok(HashAlgorithm::Sha224),
      "sha256" => Ok(HashAlgorithm::Sha256),
      "sha384" => Ok(HashAlgorithm::Sha384),
      "sha512" => Ok(HashAlgorithm::Sha512),
      "sha3_256" | "sha3-256" => Ok(HashAlgorithm::Sha3_256),
      other => Err(FleetError::UnsupportedConfiguration(format!(
        "unsupported hash type {}",
        other
      ))),
    }
  }
}

static HEX_SHAPES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
  [
    (r"^[a-fA-F0-9]{32}$", "md5"),
    (r"^[a-fA-F0-9]{40}$", "sha1"),
    (r"^[a-fA-F0-9]{56}$", "sha224"),
    (r"^[a-fA-F0-9]{64}$", "sha256"),
    (r"^[a-fA-F0-9]{96}$", "sha384"),
    (r"^[a-fA-F0-9]{128}$", "sha512"),
    (r"^[a-fA-F0-9]{32}:[a-fA-F0-9]{32}$", "ntlm"),
  ]
  .into_iter()
  .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|re| (re, name)))
  .collect()
});

/// Best guess of a hash's family from its prefix or shape. Returns
/// `"unknown"` when nothing matches. Only some of the names are crackable;
/// feed the result to [`HashAlgorithm::from_str`] to find out.
pub fn identify_hash_type(hash: &str) -> &'static str {
  let hash = hash.trim();
  if hash.starts_with('$') {
    let prefixes = [
      ("$1$", "md5crypt"),
      ("$2a$", "bcrypt"),
      ("$2b$", "bcrypt"),
      ("$2y$", "bcrypt"),
      ("$5$", "sha256crypt"),
      ("$6$", "sha512crypt"),
      ("$7$", "scrypt"),
    ];
    if let Some((_, name)) = prefixes.iter().find(|(p, _)| hash.starts_with(p)) {
      return name;
    }
  }

  HEX_SHAPES
    .iter()
    .find(|(re, _)| re.is_match(hash))
    .map(|(_, name)| *name)
    .unwrap_or("unknown")
}
