//! The policy port and the reference rule evaluator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use catalyst_core::{CatalystResult, EffectiveIdentity};

use crate::matcher::pattern_matches;

// =============================================================================
// Port types
// =============================================================================

/// Input to policy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInput {
    /// The caller's composed identity.
    pub identity: EffectiveIdentity,
    /// The action being attempted (e.g. `GET /space`).
    pub action: String,
    /// The acted-on resource, when derivable.
    pub resource: Option<String>,
    /// Request environment (forwarded headers, custom env entries).
    pub environment: Map<String, Value>,
}

/// The outcome of policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request is allowed.
    pub allow: bool,
    /// Engine-supplied reason; surfaced as `x-forward-auth-reason` on
    /// allow and as the error code on deny.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Opaque token identifying this allow decision; the cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_jwt: Option<String>,
    /// Obligations the proxy must enforce, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligations: Option<Value>,
}

impl Decision {
    /// An allow decision with no extras.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            decision_jwt: None,
            obligations: None,
        }
    }

    /// A deny decision with a reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
            decision_jwt: None,
            obligations: None,
        }
    }
}

/// The policy-evaluation port.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluates a request.
    ///
    /// # Errors
    ///
    /// Returns a `Policy` infrastructure error when the engine itself
    /// fails; a deny is a value, not an error.
    async fn evaluate(&self, input: &PolicyInput) -> CatalystResult<Decision>;
}

// =============================================================================
// Reference rule evaluator
// =============================================================================

/// Whether a matched rule allows or denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    /// The rule allows the request.
    Allow,
    /// The rule denies the request.
    Deny,
}

/// The decision applied when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultDecision {
    /// Deny unmatched requests (the safe default).
    #[default]
    Deny,
    /// Allow unmatched requests.
    Allow,
}

/// One ordered rule. A rule matches when the action matches any action
/// pattern, the resource matches (or the rule has no resource patterns),
/// and the identity carries every required scope, role, and entitlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name; used as the deny reason when none is set.
    pub name: String,
    /// Allow or deny on match.
    pub effect: RuleEffect,
    /// Action patterns (`*` wildcards).
    pub actions: Vec<String>,
    /// Resource patterns; `None` matches any resource including none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
    /// Scopes the identity must carry.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Roles the identity must carry.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Entitlements the identity must carry.
    #[serde(default)]
    pub required_entitlements: Vec<String>,
    /// Explicit decision reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Obligations attached to allow decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligations: Option<Value>,
}

impl Rule {
    fn matches(&self, input: &PolicyInput) -> bool {
        if !self.actions.iter().any(|p| pattern_matches(p, &input.action)) {
            return false;
        }

        if let Some(resources) = &self.resources {
            let Some(resource) = &input.resource else {
                return false;
            };
            if !resources.iter().any(|p| pattern_matches(p, resource)) {
                return false;
            }
        }

        let identity = &input.identity;
        self.required_scopes
            .iter()
            .all(|s| identity.scopes.iter().any(|have| have == s))
            && self
                .required_roles
                .iter()
                .all(|r| identity.roles.iter().any(|have| have == r))
            && self
                .required_entitlements
                .iter()
                .all(|e| identity.entitlements.iter().any(|have| have == e))
    }
}

/// The built-in reference engine: first matching rule wins, with a
/// configurable default for unmatched requests.
pub struct RuleEvaluator {
    rules: Vec<Rule>,
    default_decision: DefaultDecision,
    mint_decision_tokens: bool,
}

impl RuleEvaluator {
    /// Creates an evaluator over ordered rules.
    #[must_use]
    pub fn new(rules: Vec<Rule>, default_decision: DefaultDecision) -> Self {
        Self {
            rules,
            default_decision,
            mint_decision_tokens: false,
        }
    }

    /// Mints an opaque decision token on every allow, enabling the
    /// gateway's decision cache without an external token service.
    #[must_use]
    pub fn with_decision_tokens(mut self) -> Self {
        self.mint_decision_tokens = true;
        self
    }

    fn decide(&self, input: &PolicyInput) -> Decision {
        for rule in &self.rules {
            if !rule.matches(input) {
                continue;
            }
            tracing::debug!(rule = %rule.name, effect = ?rule.effect, "policy rule matched");
            let mut decision = match rule.effect {
                RuleEffect::Allow => Decision::allow(),
                RuleEffect::Deny => Decision::deny(
                    rule.reason
                        .clone()
                        .unwrap_or_else(|| rule.name.clone()),
                ),
            };
            if rule.effect == RuleEffect::Allow {
                decision.reason = rule.reason.clone();
                decision.obligations = rule.obligations.clone();
                if self.mint_decision_tokens {
                    decision.decision_jwt = Some(format!("dec.{}", Uuid::new_v4()));
                }
            }
            return decision;
        }

        match self.default_decision {
            DefaultDecision::Allow => {
                let mut decision = Decision::allow();
                if self.mint_decision_tokens {
                    decision.decision_jwt = Some(format!("dec.{}", Uuid::new_v4()));
                }
                decision
            }
            DefaultDecision::Deny => Decision::deny("policy_denied"),
        }
    }
}

#[async_trait]
impl PolicyEngine for RuleEvaluator {
    async fn evaluate(&self, input: &PolicyInput) -> CatalystResult<Decision> {
        Ok(self.decide(input))
    }
}
