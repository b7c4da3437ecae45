//! Authorization policy engine
//!
//! Named policies evaluated against a validated token's claim set and the
//! request context. Deny is the default: an unknown policy denies, and a
//! policy allows only when every constituent requirement holds. Denials are
//! logged for audit and never retried.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::claims::ClaimSet;

/// Policy evaluation errors (all map to HTTP 403 at the resource server)
#[derive(Debug, Error)]
pub enum PolicyError {
    /// No policy registered under this name; denied by default
    #[error("policy not found: {0}")]
    NotFound(String),

    /// A requirement did not hold
    #[error("denied by policy '{policy}': {reason}")]
    Denied {
        /// The policy that denied
        policy: String,
        /// Which requirement failed
        reason: String,
    },
}

/// A single constraint within a policy
#[derive(Debug, Clone)]
pub enum Requirement {
    /// The caller must be authenticated (carry a subject claim)
    Authenticated,
    /// The caller must hold a claim of `claim_type` with one of the allowed values
    Claim {
        /// Required claim type
        claim_type: String,
        /// Accepted values
        allowed_values: Vec<String>,
    },
    /// The caller's subject must equal the resource's recorded owner
    ResourceOwner,
}

/// Request-scoped facts a policy may consult
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Recorded owner subject of the addressed resource, when known
    pub resource_owner: Option<String>,
}

impl RequestContext {
    /// Context for a request addressing a resource with a recorded owner
    pub fn for_resource_owner(owner_subject_id: impl Into<String>) -> Self {
        Self {
            resource_owner: Some(owner_subject_id.into()),
        }
    }
}

/// A named policy: a conjunction of requirements
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    requirements: Vec<Requirement>,
}

impl Policy {
    /// Start a policy with the authenticated-user requirement
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: vec![Requirement::Authenticated],
        }
    }

    /// Require a claim with one of the given values
    pub fn require_claim<S: Into<String>>(
        mut self,
        claim_type: impl Into<String>,
        allowed_values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.requirements.push(Requirement::Claim {
            claim_type: claim_type.into(),
            allowed_values: allowed_values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Require the caller to own the addressed resource
    pub fn require_resource_owner(mut self) -> Self {
        self.requirements.push(Requirement::ResourceOwner);
        self
    }

    /// Policy name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, claims: &ClaimSet, ctx: &RequestContext) -> Result<(), String> {
        for requirement in &self.requirements {
            match requirement {
                Requirement::Authenticated => {
                    if claims.subject().is_none() {
                        return Err("caller is not authenticated".to_string());
                    }
                }
                Requirement::Claim {
                    claim_type,
                    allowed_values,
                } => {
                    let held = allowed_values.iter().any(|v| claims.has(claim_type, v));
                    if !held {
                        return Err(format!(
                            "required claim '{claim_type}' with an accepted value is missing"
                        ));
                    }
                }
                Requirement::ResourceOwner => {
                    // Allow iff the caller's subject equals the recorded owner.
                    let caller = claims.subject();
                    let owner = ctx.resource_owner.as_deref();
                    match (caller, owner) {
                        (Some(caller), Some(owner)) if caller == owner => {}
                        (_, None) => {
                            return Err("resource has no recorded owner".to_string());
                        }
                        _ => {
                            return Err("caller does not own the resource".to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Evaluates named policies against validated claims
///
/// Policies are registered at construction; evaluation is a pure predicate
/// over the claim set and request context.
pub struct PolicyEngine {
    policies: HashMap<String, Policy>,
}

impl PolicyEngine {
    /// Create an engine over the given policies
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    /// Evaluate a named policy; `Ok(())` means Allow
    pub fn evaluate(
        &self,
        policy_name: &str,
        claims: &ClaimSet,
        ctx: &RequestContext,
    ) -> Result<(), PolicyError> {
        let Some(policy) = self.policies.get(policy_name) else {
            warn!(policy = policy_name, "denying request for unknown policy");
            return Err(PolicyError::NotFound(policy_name.to_string()));
        };

        match policy.check(claims, ctx) {
            Ok(()) => {
                debug!(policy = policy_name, subject = ?claims.subject(), "policy allowed");
                Ok(())
            }
            Err(reason) => {
                // Audit trail for every 403
                warn!(
                    policy = policy_name,
                    subject = ?claims.subject(),
                    %reason,
                    "policy denied"
                );
                Err(PolicyError::Denied {
                    policy: policy_name.to_string(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::claim_types;

    fn engine() -> PolicyEngine {
        PolicyEngine::new([
            Policy::new("CanOrderFrame")
                .require_claim(claim_types::SUBSCRIPTION_LEVEL, ["PayingUser"])
                .require_claim(claim_types::COUNTRY, ["be"]),
            Policy::new("MustOwnImage").require_resource_owner(),
        ])
    }

    fn paying_user_be() -> ClaimSet {
        ClaimSet::from_pairs([
            (claim_types::SUB, "abc"),
            (claim_types::SUBSCRIPTION_LEVEL, "PayingUser"),
            (claim_types::COUNTRY, "be"),
        ])
    }

    #[test]
    fn test_claim_policy_allows_when_all_requirements_hold() {
        let result = engine().evaluate(
            "CanOrderFrame",
            &paying_user_be(),
            &RequestContext::default(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_claim_policy_denies_free_user_even_in_be() {
        let claims = ClaimSet::from_pairs([
            (claim_types::SUB, "abc"),
            (claim_types::SUBSCRIPTION_LEVEL, "FreeUser"),
            (claim_types::COUNTRY, "be"),
        ]);
        let result = engine().evaluate("CanOrderFrame", &claims, &RequestContext::default());
        assert!(matches!(result, Err(PolicyError::Denied { .. })));
    }

    #[test]
    fn test_ownership_allows_the_owner() {
        let ctx = RequestContext::for_resource_owner("abc");
        assert!(engine().evaluate("MustOwnImage", &paying_user_be(), &ctx).is_ok());
    }

    #[test]
    fn test_ownership_denies_non_owners() {
        let ctx = RequestContext::for_resource_owner("someone-else");
        let result = engine().evaluate("MustOwnImage", &paying_user_be(), &ctx);
        assert!(matches!(result, Err(PolicyError::Denied { .. })));
    }

    #[test]
    fn test_ownership_denies_when_owner_unknown() {
        let result = engine().evaluate(
            "MustOwnImage",
            &paying_user_be(),
            &RequestContext::default(),
        );
        assert!(matches!(result, Err(PolicyError::Denied { .. })));
    }

    #[test]
    fn test_unknown_policy_denies_by_default() {
        let result = engine().evaluate(
            "NoSuchPolicy",
            &paying_user_be(),
            &RequestContext::default(),
        );
        assert!(matches!(result, Err(PolicyError::NotFound(_))));
    }

    #[test]
    fn test_unauthenticated_caller_denied() {
        let claims = ClaimSet::from_pairs([(claim_types::COUNTRY, "be")]);
        let result = engine().evaluate("CanOrderFrame", &claims, &RequestContext::default());
        assert!(matches!(result, Err(PolicyError::Denied { .. })));
    }
}
