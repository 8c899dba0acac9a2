//! Gated path matching and resource identifier normalisation.
//!
//! Requests under `/ipfs/{token}` are subject to admission control. The token
//! is parsed as a CID and re-serialised, so every encoding of the same CID maps
//! to one canonical string before it is used as a limiter key or sent to the
//! pinning service.
use std::fmt;

use cid::Cid;

/// Path prefix whose requests are subject to admission control.
pub const GATED_PREFIX: &str = "/ipfs/";

/// Result of matching a request path against the gated prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedPath<'a> {
    /// The path is outside the gated prefix and bypasses admission.
    NotGated,
    /// The prefix matched but no resource token follows it.
    Empty,
    /// Raw resource token: everything after the prefix up to the next `/`.
    Token(&'a str),
}

impl<'a> GatedPath<'a> {
    pub fn parse(path: &'a str) -> Self {
        let Some(rest) = path.strip_prefix(GATED_PREFIX) else {
            return GatedPath::NotGated;
        };

        let token = rest.split('/').next().unwrap_or_default();
        if token.is_empty() {
            GatedPath::Empty
        } else {
            GatedPath::Token(token)
        }
    }

    pub fn is_gated(&self) -> bool {
        !matches!(self, GatedPath::NotGated)
    }
}

/// Canonical content identifier of a gated request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    cid: Cid,
    canonical: String,
}

impl ResourceId {
    /// Parse a raw path token into its canonical form.
    pub fn parse(token: &str) -> Result<Self, cid::Error> {
        let cid = Cid::try_from(token)?;
        let canonical = cid.to_string();
        Ok(Self { cid, canonical })
    }

    /// Canonical string form: base58btc for CIDv0, base32 for CIDv1.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Lowercase hex of the multihash bytes (hash function code, length, digest).
    pub fn hash_hex(&self) -> String {
        hex::encode(self.cid.hash().to_bytes())
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
