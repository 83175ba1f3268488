//! Security Layer
//!
//! Tiered capability enforcement with an approval gate for privileged
//! actions. All state (issued tokens, pending approvals, the approval
//! log) is owned by the layer instance. Every check fails closed: a
//! missing, expired, or forged token grants nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::security::token::CapabilityToken;
use crate::types::{ApprovalRequest, ApprovalStatus};

/// Capability sets by tier, each a superset of the one before it.
const TIER_CAPABILITIES: &[(&str, &[&str])] = &[
    ("sandbox", &["read", "compute"]),
    ("worker", &["read", "compute", "write_temp"]),
    (
        "autonomy",
        &["read", "compute", "write_temp", "write_module", "repair"],
    ),
    (
        "admin",
        &[
            "read",
            "compute",
            "write_temp",
            "write_module",
            "repair",
            "promote",
            "delete",
            "configure",
        ],
    ),
];

/// Capabilities that additionally need a recorded approval to act on.
const APPROVAL_REQUIRED: &[&str] = &["delete", "promote", "configure"];

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

pub struct SecurityLayer {
    secret: String,
    tokens: Mutex<HashMap<String, CapabilityToken>>,
    pending: Mutex<HashMap<String, ApprovalRequest>>,
    approval_log: Mutex<Vec<ApprovalRequest>>,
    last_stamp: Mutex<i64>,
}

impl SecurityLayer {
    /// An empty secret is a configuration error, not a soft default.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            bail!("Signing secret must not be empty");
        }
        Ok(SecurityLayer {
            secret: secret.to_string(),
            tokens: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            approval_log: Mutex::new(Vec::new()),
            last_stamp: Mutex::new(0),
        })
    }

    pub fn known_tiers() -> Vec<&'static str> {
        TIER_CAPABILITIES.iter().map(|(tier, _)| *tier).collect()
    }

    /// Issue a token for `entity_id` at `tier`. The token replaces any
    /// previous token held by the same entity.
    pub fn issue_token(
        &self,
        entity_id: &str,
        tier: &str,
        ttl_seconds: u64,
    ) -> Result<CapabilityToken> {
        let caps = match tier_capabilities(tier) {
            Some(caps) => caps,
            None => bail!("Unknown capability tier: {}", tier),
        };

        let capabilities: BTreeSet<String> = caps.iter().map(|c| c.to_string()).collect();
        let expires_at = Utc::now().timestamp() + ttl_seconds as i64;
        let token = CapabilityToken::issue(entity_id, capabilities, expires_at, &self.secret)?;

        self.tokens
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), token.clone());
        info!("Issued '{}' tier token to {}", tier, entity_id);
        Ok(token)
    }

    /// True when `entity_id` holds an unexpired, untampered token.
    pub fn validate_token(&self, entity_id: &str) -> bool {
        self.tokens
            .lock()
            .unwrap()
            .get(entity_id)
            .map(|t| t.is_valid(&self.secret))
            .unwrap_or(false)
    }

    /// True when `entity_id` holds a valid token granting `capability`.
    pub fn check_capability(&self, entity_id: &str, capability: &str) -> bool {
        let granted = self
            .tokens
            .lock()
            .unwrap()
            .get(entity_id)
            .map(|t| t.has_capability(capability, &self.secret))
            .unwrap_or(false);
        if !granted {
            warn!("Capability '{}' denied for {}", capability, entity_id);
        }
        granted
    }

    pub fn requires_approval(&self, capability: &str) -> bool {
        APPROVAL_REQUIRED.contains(&capability)
    }

    /// File an approval request; returns its id. The request stays
    /// pending until approved or denied.
    pub fn request_approval(&self, entity_id: &str, action: &str, context: Value) -> String {
        let id = format!("APR-{}", self.next_stamp());
        let request = ApprovalRequest {
            id: id.clone(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            context,
            requested_at: Utc::now().to_rfc3339(),
            status: ApprovalStatus::Pending,
            approved_by: None,
            approved_at: None,
            reason: None,
        };
        self.pending.lock().unwrap().insert(id.clone(), request);
        info!("Approval requested: {} wants '{}' ({})", entity_id, action, id);
        id
    }

    /// Mark a pending request approved. Requests transition exactly
    /// once: unknown ids and already-resolved requests return false.
    pub fn approve(&self, approval_id: &str, approver: &str) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let request = match pending.get_mut(approval_id) {
            Some(r) if r.status == ApprovalStatus::Pending => r,
            _ => return false,
        };
        request.status = ApprovalStatus::Approved;
        request.approved_by = Some(approver.to_string());
        request.approved_at = Some(Utc::now().to_rfc3339());
        self.approval_log.lock().unwrap().push(request.clone());
        info!("Approval {} granted by {}", approval_id, approver);
        true
    }

    /// Mark a pending request denied. Same single-transition rule as
    /// [`approve`](Self::approve).
    pub fn deny(&self, approval_id: &str, reason: &str) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let request = match pending.get_mut(approval_id) {
            Some(r) if r.status == ApprovalStatus::Pending => r,
            _ => return false,
        };
        request.status = ApprovalStatus::Denied;
        request.reason = Some(reason.to_string());
        info!("Approval {} denied: {}", approval_id, reason);
        true
    }

    /// True when an approved request exists for this entity and action.
    /// Approvals are not consumed; a grant covers repeats of the same
    /// action by the same entity.
    pub fn has_approved(&self, entity_id: &str, action: &str) -> bool {
        self.pending
            .lock()
            .unwrap()
            .values()
            .any(|r| {
                r.entity_id == entity_id
                    && r.action == action
                    && r.status == ApprovalStatus::Approved
            })
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.id.cmp(&b.id));
        requests
    }

    pub fn revoke_token(&self, entity_id: &str) {
        if self.tokens.lock().unwrap().remove(entity_id).is_some() {
            info!("Revoked token for {}", entity_id);
        }
    }

    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_stamp.lock().unwrap();
        let stamp = if now > *last { now } else { *last + 1 };
        *last = stamp;
        stamp
    }
}

fn tier_capabilities(tier: &str) -> Option<&'static [&'static str]> {
    TIER_CAPABILITIES
        .iter()
        .find(|(name, _)| *name == tier)
        .map(|(_, caps)| *caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer() -> SecurityLayer {
        SecurityLayer::new("unit-test-secret").unwrap()
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(SecurityLayer::new("").is_err());
    }

    #[test]
    fn test_unknown_tier_is_rejected() {
        let layer = layer();
        assert!(layer.issue_token("e", "root", DEFAULT_TOKEN_TTL_SECS).is_err());
    }

    #[test]
    fn test_tier_capabilities_nest() {
        let layer = layer();
        layer.issue_token("sb", "sandbox", DEFAULT_TOKEN_TTL_SECS).unwrap();
        layer.issue_token("adm", "admin", DEFAULT_TOKEN_TTL_SECS).unwrap();

        assert!(layer.check_capability("sb", "read"));
        assert!(!layer.check_capability("sb", "write_temp"));
        assert!(!layer.check_capability("sb", "promote"));
        assert!(layer.check_capability("adm", "promote"));
        assert!(layer.check_capability("adm", "read"));
    }

    #[test]
    fn test_missing_entity_has_no_capabilities() {
        let layer = layer();
        assert!(!layer.validate_token("ghost"));
        assert!(!layer.check_capability("ghost", "read"));
    }

    #[test]
    fn test_revoked_token_no_longer_grants() {
        let layer = layer();
        layer.issue_token("e", "autonomy", DEFAULT_TOKEN_TTL_SECS).unwrap();
        assert!(layer.check_capability("e", "repair"));

        layer.revoke_token("e");
        assert!(!layer.check_capability("e", "repair"));
    }

    #[test]
    fn test_requires_approval_for_privileged_actions() {
        let layer = layer();
        assert!(layer.requires_approval("promote"));
        assert!(layer.requires_approval("delete"));
        assert!(layer.requires_approval("configure"));
        assert!(!layer.requires_approval("repair"));
    }

    #[test]
    fn test_approval_flow() {
        let layer = layer();
        let id = layer.request_approval("e", "promote", json!({"module": "a.py"}));

        assert!(!layer.has_approved("e", "promote"));
        assert_eq!(layer.pending_approvals().len(), 1);

        assert!(layer.approve(&id, "operator"));
        assert!(layer.has_approved("e", "promote"));
        assert!(layer.pending_approvals().is_empty());
    }

    #[test]
    fn test_denied_request_never_approves() {
        let layer = layer();
        let id = layer.request_approval("e", "delete", json!({}));
        assert!(layer.deny(&id, "too risky"));
        assert!(!layer.has_approved("e", "delete"));
    }

    #[test]
    fn test_resolved_requests_transition_exactly_once() {
        let layer = layer();

        let approved = layer.request_approval("e", "promote", json!({}));
        assert!(layer.approve(&approved, "operator"));
        assert!(!layer.approve(&approved, "operator"));
        assert!(!layer.deny(&approved, "late"));

        let denied = layer.request_approval("e", "configure", json!({}));
        assert!(layer.deny(&denied, "no"));
        assert!(!layer.deny(&denied, "again"));
        assert!(!layer.approve(&denied, "operator"));
        assert!(!layer.has_approved("e", "configure"));
    }

    #[test]
    fn test_unknown_approval_id() {
        let layer = layer();
        assert!(!layer.approve("APR-0", "operator"));
        assert!(!layer.deny("APR-0", "nope"));
    }

    #[test]
    fn test_approval_is_scoped_to_entity_and_action() {
        let layer = layer();
        let id = layer.request_approval("e", "promote", json!({}));
        layer.approve(&id, "operator");

        assert!(layer.has_approved("e", "promote"));
        assert!(!layer.has_approved("other", "promote"));
        assert!(!layer.has_approved("e", "delete"));
    }
}
