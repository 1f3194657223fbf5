use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProspectorError;

/// Bumped whenever the mapping below changes. Recorded next to every
/// checkpoint so readers know which function produced the partitioning.
pub const SHARD_FUNCTION_VERSION: u32 = 1;

/// Shard code used for empty identities.
pub const EMPTY_SHARD: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategy {
    /// Single character taken from a place identifier.
    Place,
    /// First byte of the SHA-256 of the lowercased domain, as hex.
    Domain,
    /// Leading character of a stringified coordinate.
    Geo,
    /// No sharding.
    None,
}

impl ShardStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Place => "place",
            Self::Domain => "domain",
            Self::Geo => "geo",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ShardStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardStrategy {
    type Err = ProspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "place" => Ok(Self::Place),
            "domain" => Ok(Self::Domain),
            "geo" => Ok(Self::Geo),
            "none" => Ok(Self::None),
            other => Err(ProspectorError::Validation(format!(
                "unknown shard strategy: {other}"
            ))),
        }
    }
}

/// Map an identity to its shard code. Pure and stable across restarts.
pub fn shard(identity: &str, strategy: ShardStrategy) -> String {
    if strategy == ShardStrategy::None {
        return String::new();
    }
    if identity.is_empty() {
        return EMPTY_SHARD.to_string();
    }

    match strategy {
        ShardStrategy::Place => {
            let chars: Vec<char> = identity.chars().collect();
            let c = if chars.len() >= 6 {
                chars[5]
            } else {
                chars[chars.len() - 1]
            };
            if c.is_ascii_alphanumeric() {
                c.to_string()
            } else {
                EMPTY_SHARD.to_string()
            }
        }
        ShardStrategy::Domain => {
            let digest = Sha256::digest(identity.to_lowercase().as_bytes());
            hex::encode(&digest[..1])
        }
        ShardStrategy::Geo => match identity.trim().chars().next() {
            // Negative latitudes keep their sign as the code.
            Some(c) if c.is_ascii_alphanumeric() || c == '-' => c.to_string(),
            _ => EMPTY_SHARD.to_string(),
        },
        ShardStrategy::None => String::new(),
    }
}

/// Canonical 0.1-degree grid value for a coordinate, as a one-decimal string.
pub fn grid_value(x: f64) -> String {
    // The epsilon absorbs representation error (44.9 * 10 = 448.999...).
    let snapped = ((x * 10.0) + 1e-9).floor() / 10.0;
    let snapped = if snapped == 0.0 { 0.0 } else { snapped };
    format!("{snapped:.1}")
}

/// Canonical grid tile for a coordinate pair.
pub fn grid_tile(lat: f64, lon: f64) -> (String, String) {
    (grid_value(lat), grid_value(lon))
}

/// Whether a path segment already names a canonical grid value.
pub fn is_canonical_coordinate(segment: &str) -> bool {
    match segment.parse::<f64>() {
        Ok(x) => grid_value(x) == segment,
        Err(_) => false,
    }
}
