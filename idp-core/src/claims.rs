//! Typed claim model
//!
//! Claims are (type, value) pairs asserted about a subject. They are carried
//! in access/id tokens and returned from the userinfo endpoint. Claim types
//! are centralized here so lookups stay typo-proof instead of being scattered
//! as string literals.

use serde::{Deserialize, Serialize};

/// Well-known claim type constants
pub mod claim_types {
    /// Subject identifier (stable, opaque, unique per user)
    pub const SUB: &str = "sub";
    /// Given name, released by the `profile` scope
    pub const GIVEN_NAME: &str = "given_name";
    /// Family name, released by the `profile` scope
    pub const FAMILY_NAME: &str = "family_name";
    /// Postal address, released by the `address` scope
    pub const ADDRESS: &str = "address";
    /// Application role, released by the `roles` scope
    pub const ROLE: &str = "role";
    /// Subscription tier (e.g. `FreeUser`, `PayingUser`)
    pub const SUBSCRIPTION_LEVEL: &str = "subscription_level";
    /// ISO country code
    pub const COUNTRY: &str = "country";
}

/// A single typed assertion about a subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, one of [`claim_types`] or a custom type
    pub claim_type: String,
    /// Claim value
    pub value: String,
}

impl Claim {
    /// Create a new claim
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// An ordered multiset of claims
///
/// A claim type may appear more than once (e.g. multiple roles). Insertion
/// order is preserved so token payloads stay deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    claims: Vec<Claim>,
}

impl ClaimSet {
    /// Create an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a claim set from (type, value) pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            claims: pairs
                .into_iter()
                .map(|(t, v)| Claim::new(t, v))
                .collect(),
        }
    }

    /// Add a claim, keeping any existing claims of the same type
    pub fn add(&mut self, claim_type: impl Into<String>, value: impl Into<String>) {
        self.claims.push(Claim::new(claim_type, value));
    }

    /// First value for a claim type, if present
    pub fn get(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// All values for a claim type
    pub fn get_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Whether the set contains the exact (type, value) pair
    pub fn has(&self, claim_type: &str, value: &str) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && c.value == value)
    }

    /// The subject identifier, if present
    pub fn subject(&self) -> Option<&str> {
        self.get(claim_types::SUB)
    }

    /// Claims whose type is in `claim_types`, as a new set
    ///
    /// Used to filter a user's claims down to what the granted scopes release.
    pub fn retain_types(&self, claim_types: &[&str]) -> ClaimSet {
        ClaimSet {
            claims: self
                .claims
                .iter()
                .filter(|c| claim_types.contains(&c.claim_type.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Iterate over all claims
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    /// Number of claims in the set
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl FromIterator<Claim> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        Self {
            claims: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_valued_claims() {
        let mut set = ClaimSet::new();
        set.add(claim_types::ROLE, "PayingUser");
        set.add(claim_types::ROLE, "Admin");

        assert_eq!(set.get(claim_types::ROLE), Some("PayingUser"));
        let roles: Vec<_> = set.get_all(claim_types::ROLE).collect();
        assert_eq!(roles, vec!["PayingUser", "Admin"]);
    }

    #[test]
    fn test_has_exact_pair() {
        let set = ClaimSet::from_pairs([
            (claim_types::COUNTRY, "be"),
            (claim_types::SUBSCRIPTION_LEVEL, "FreeUser"),
        ]);

        assert!(set.has(claim_types::COUNTRY, "be"));
        assert!(!set.has(claim_types::COUNTRY, "fr"));
        assert!(!set.has(claim_types::SUBSCRIPTION_LEVEL, "PayingUser"));
    }

    #[test]
    fn test_retain_types_filters() {
        let set = ClaimSet::from_pairs([
            (claim_types::SUB, "abc"),
            (claim_types::GIVEN_NAME, "Claire"),
            (claim_types::COUNTRY, "be"),
        ]);

        let filtered = set.retain_types(&[claim_types::SUB, claim_types::COUNTRY]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.subject(), Some("abc"));
        assert_eq!(filtered.get(claim_types::GIVEN_NAME), None);
    }
}
