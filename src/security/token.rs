//! Capability Tokens
//!
//! HMAC-SHA256 signed grants. A token binds an entity id to a
//! capability set and an expiry; the signature covers all three, so a
//! token with an edited capability list or a pushed-out expiry fails
//! verification. Tokens never embed the signing secret - verification
//! is done by whoever holds it.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// A fresh 32-byte signing secret from the OS entropy pool, hex
/// encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub entity_id: String,
    pub capabilities: BTreeSet<String>,
    /// Unix seconds. A token is invalid strictly after this instant.
    pub expires_at: i64,
    pub signature: String,
}

impl CapabilityToken {
    /// Sign a new token with `secret`.
    pub fn issue(
        entity_id: &str,
        capabilities: BTreeSet<String>,
        expires_at: i64,
        secret: &str,
    ) -> Result<Self> {
        let signature = sign_payload(secret, entity_id, &capabilities, expires_at)?;
        Ok(CapabilityToken {
            entity_id: entity_id.to_string(),
            capabilities,
            expires_at,
            signature,
        })
    }

    /// True when the token is unexpired and its signature matches a
    /// fresh computation over its fields.
    pub fn is_valid(&self, secret: &str) -> bool {
        if Utc::now().timestamp() > self.expires_at {
            return false;
        }
        let computed =
            match sign_payload(secret, &self.entity_id, &self.capabilities, self.expires_at) {
                Ok(sig) => sig,
                Err(_) => return false,
            };
        signatures_match(&self.signature, &computed)
    }

    /// True when the token is valid and grants `capability`.
    pub fn has_capability(&self, capability: &str, secret: &str) -> bool {
        self.capabilities.contains(capability) && self.is_valid(secret)
    }
}

/// The signed payload is `entity:cap1,cap2,...:expiry` with the
/// capability list in sorted order, so equal grants sign identically.
fn sign_payload(
    secret: &str,
    entity_id: &str,
    capabilities: &BTreeSet<String>,
    expires_at: i64,
) -> Result<String> {
    let caps: Vec<&str> = capabilities.iter().map(|c| c.as_str()).collect();
    let data = format!("{}:{}:{}", entity_id, caps.join(","), expires_at);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid signing secret: {}", e))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of two hex signatures.
fn signatures_match(stored: &str, computed: &str) -> bool {
    let expected = match hex::decode(stored) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let actual = match hex::decode(computed) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if expected.len() != actual.len() {
        return false;
    }
    expected.ct_eq(actual.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn future() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_issued_token_is_valid() {
        let token =
            CapabilityToken::issue("engine", caps(&["read", "repair"]), future(), "s3cret")
                .unwrap();
        assert!(token.is_valid("s3cret"));
        assert!(token.has_capability("repair", "s3cret"));
        assert!(!token.has_capability("promote", "s3cret"));
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let past = Utc::now().timestamp() - 10;
        let token = CapabilityToken::issue("engine", caps(&["read"]), past, "s3cret").unwrap();
        assert!(!token.is_valid("s3cret"));
        assert!(!token.has_capability("read", "s3cret"));
    }

    #[test]
    fn test_tampered_capabilities_fail_verification() {
        let mut token =
            CapabilityToken::issue("engine", caps(&["read"]), future(), "s3cret").unwrap();
        token.capabilities.insert("promote".to_string());
        assert!(!token.is_valid("s3cret"));
    }

    #[test]
    fn test_tampered_expiry_fails_verification() {
        let mut token =
            CapabilityToken::issue("engine", caps(&["read"]), future(), "s3cret").unwrap();
        token.expires_at += 86_400;
        assert!(!token.is_valid("s3cret"));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let token = CapabilityToken::issue("engine", caps(&["read"]), future(), "s3cret").unwrap();
        assert!(!token.is_valid("other"));
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = CapabilityToken::issue("e", caps(&["read", "compute"]), 2_000_000_000, "k")
            .unwrap();
        let b = CapabilityToken::issue("e", caps(&["compute", "read"]), 2_000_000_000, "k")
            .unwrap();
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn test_generated_secrets_are_unique_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
