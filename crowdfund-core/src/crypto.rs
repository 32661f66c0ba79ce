//! Identifier derivation
//!
//! Campaigns are addressed by the SHA-256 digest of their UTF-8 name. Callers
//! compute the same digest to look a campaign up.

use crate::types::CampaignId;
use sha2::{Digest, Sha256};

/// Derive the campaign id for a name
pub fn campaign_id(name: &str) -> CampaignId {
    let digest: [u8; 32] = Sha256::digest(name.as_bytes()).into();
    CampaignId::from_bytes(digest)
}

/// Hash an arbitrary domain-separated value
///
/// Used by collaborators that need deterministic addresses derived from a
/// campaign (e.g. the group created on success).
pub fn domain_hash(domain: &str, value: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((domain.len() as u64).to_be_bytes());
    hasher.update(domain.as_bytes());
    hasher.update(value);
    hasher.finalize().into()
}
