use crate::action::{Action, CallId, SafetyCheck};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{info, warn};

/// Outcome of classifying a pending action.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Clear,
    Blocked { reason: String },
}

/// Host-supplied classification of actions that require confirmation.
///
/// The crate ships no built-in categories: what counts as risky is the
/// host's call. Policies are pure metadata inspection, so the trait is sync.
pub trait SafetyPolicy: Send + Sync {
    fn check(&self, action: &Action) -> Verdict;
}

/// Never flags anything. Model-attached safety checks still gate.
#[derive(Clone, Copy, Default)]
pub struct AllowAll;

impl SafetyPolicy for AllowAll {
    fn check(&self, _action: &Action) -> Verdict {
        Verdict::Clear
    }
}

/// Flags keypress combinations the host listed, case-insensitively and
/// regardless of key order (`["ctrl", "alt", "delete"]`).
#[derive(Clone, Debug, Default)]
pub struct KeyComboPolicy {
    flagged: Vec<Vec<String>>,
}

impl KeyComboPolicy {
    pub fn new(flagged: impl IntoIterator<Item = Vec<String>>) -> Self {
        Self {
            flagged: flagged
                .into_iter()
                .map(|combo| combo.into_iter().map(|k| k.to_lowercase()).collect())
                .collect(),
        }
    }
}

impl SafetyPolicy for KeyComboPolicy {
    fn check(&self, action: &Action) -> Verdict {
        let Action::Keypress { keys } = action else {
            return Verdict::Clear;
        };
        let pressed: HashSet<String> = keys.iter().map(|k| k.to_lowercase()).collect();
        for combo in &self.flagged {
            if !combo.is_empty() && combo.iter().all(|k| pressed.contains(k)) {
                return Verdict::Blocked {
                    reason: format!("flagged key combination: {}", combo.join("+")),
                };
            }
        }
        Verdict::Clear
    }
}

/// Flags navigation to hosts the operator listed, by domain suffix
/// (`"example.com"` also matches `sub.example.com`).
#[derive(Clone, Debug, Default)]
pub struct DomainPolicy {
    flagged: Vec<String>,
}

impl DomainPolicy {
    pub fn new(flagged: impl IntoIterator<Item = String>) -> Self {
        Self {
            flagged: flagged.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    fn host_of(url: &str) -> Option<String> {
        let rest = url.split("://").nth(1).unwrap_or(url);
        let host = rest.split(['/', '?', '#']).next()?;
        let host = host.split('@').last()?.split(':').next()?;
        if host.is_empty() {
            None
        } else {
            Some(host.to_lowercase())
        }
    }
}

impl SafetyPolicy for DomainPolicy {
    fn check(&self, action: &Action) -> Verdict {
        let Action::Goto { url } = action else {
            return Verdict::Clear;
        };
        let Some(host) = Self::host_of(url) else {
            return Verdict::Blocked {
                reason: format!("unparseable destination: {}", url),
            };
        };
        for domain in &self.flagged {
            if host == *domain || host.ends_with(&format!(".{}", domain)) {
                return Verdict::Blocked {
                    reason: format!("flagged destination: {}", host),
                };
            }
        }
        Verdict::Clear
    }
}

/// First blocked verdict wins.
#[derive(Default)]
pub struct PolicySet {
    policies: Vec<Box<dyn SafetyPolicy>>,
}

impl PolicySet {
    pub fn new(policies: Vec<Box<dyn SafetyPolicy>>) -> Self {
        Self { policies }
    }
}

impl SafetyPolicy for PolicySet {
    fn check(&self, action: &Action) -> Verdict {
        for p in &self.policies {
            if let v @ Verdict::Blocked { .. } = p.check(action) {
                return v;
            }
        }
        Verdict::Clear
    }
}

/// Operator confirmation seam. Awaiting this is the loop's pause.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn confirm(&self, call_id: &CallId, checks: &[SafetyCheck]) -> bool;
}

/// Confirms everything. For unattended runs where the host accepts the risk.
#[derive(Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl Acknowledger for AcceptAll {
    async fn confirm(&self, call_id: &CallId, checks: &[SafetyCheck]) -> bool {
        for c in checks {
            info!(%call_id, check = %c.id, "auto-acknowledging safety check: {}", c.message);
        }
        true
    }
}

/// Refuses everything. The fail-closed default.
#[derive(Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl Acknowledger for DenyAll {
    async fn confirm(&self, _call_id: &CallId, _checks: &[SafetyCheck]) -> bool {
        false
    }
}

/// Checks that must be refused for a dispatch attempt.
#[derive(Debug)]
pub struct Refused {
    pub checks: Vec<SafetyCheck>,
}

/// The confirmation checkpoint in front of the Action Executor.
///
/// An action's required checks are the model-attached pending checks plus
/// whatever the host policy flags. Acknowledgments are recorded against the
/// exact call id and are not transferable to another call, even an
/// identical one reissued later.
pub struct SafetyGate {
    policy: Box<dyn SafetyPolicy>,
    acknowledger: Box<dyn Acknowledger>,
    ledger: Mutex<HashMap<CallId, HashSet<String>>>,
}

impl Default for SafetyGate {
    /// No host policy, no operator: anything flagged is refused.
    fn default() -> Self {
        Self::new(Box::new(AllowAll), Box::new(DenyAll))
    }
}

impl SafetyGate {
    pub fn new(policy: Box<dyn SafetyPolicy>, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            policy,
            acknowledger,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Record an acknowledgment gathered out of band, before dispatch.
    pub fn preacknowledge(&self, call_id: &CallId, checks: &[SafetyCheck]) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .entry(call_id.clone())
            .or_default()
            .extend(checks.iter().map(|c| c.id.clone()));
    }

    fn already_acknowledged(&self, call_id: &CallId, required: &[SafetyCheck]) -> bool {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .get(call_id)
            .map(|ids| required.iter().all(|c| ids.contains(&c.id)))
            .unwrap_or(false)
    }

    /// Gate one dispatch attempt. Returns the acknowledged checks to attach
    /// to the call output (empty when nothing was required), or [`Refused`]
    /// when the operator withheld acknowledgment — blocking is terminal for
    /// this attempt.
    pub async fn clear(
        &self,
        call_id: &CallId,
        action: &Action,
        pending: &[SafetyCheck],
    ) -> Result<Vec<SafetyCheck>, Refused> {
        let mut required = pending.to_vec();
        if let Verdict::Blocked { reason } = self.policy.check(action) {
            required.push(SafetyCheck::new(
                format!("policy-{}", call_id),
                "host_policy",
                reason,
            ));
        }
        if required.is_empty() {
            return Ok(Vec::new());
        }

        if self.already_acknowledged(call_id, &required) {
            info!(%call_id, "safety checks previously acknowledged");
            return Ok(required);
        }

        warn!(
            %call_id,
            action = action.kind(),
            checks = required.len(),
            "action requires safety acknowledgment"
        );
        if self.acknowledger.confirm(call_id, &required).await {
            self.preacknowledge(call_id, &required);
            Ok(required)
        } else {
            Err(Refused { checks: required })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Acknowledger that must never be consulted.
    struct Unreachable;

    #[async_trait]
    impl Acknowledger for Unreachable {
        async fn confirm(&self, _call_id: &CallId, _checks: &[SafetyCheck]) -> bool {
            panic!("acknowledger consulted for a clear action");
        }
    }

    fn click() -> Action {
        Action::Click {
            x: 1,
            y: 2,
            button: Default::default(),
        }
    }

    #[tokio::test]
    async fn clear_action_skips_the_acknowledger() {
        let gate = SafetyGate::new(Box::new(AllowAll), Box::new(Unreachable));
        let acked = gate.clear(&"c1".into(), &click(), &[]).await.unwrap();
        assert!(acked.is_empty());
    }

    #[tokio::test]
    async fn model_flagged_check_is_refused_by_default() {
        let gate = SafetyGate::default();
        let pending = vec![SafetyCheck::new("sc1", "malicious_instructions", "careful")];
        let err = gate.clear(&"c1".into(), &click(), &pending).await.unwrap_err();
        assert_eq!(err.checks.len(), 1);
        assert_eq!(err.checks[0].id, "sc1");
    }

    #[tokio::test]
    async fn acknowledgment_is_not_transferable_between_calls() {
        let gate = SafetyGate::default();
        let pending = vec![SafetyCheck::new("sc1", "irreversible", "destructive keypress")];
        let action = Action::Keypress {
            keys: vec!["CTRL".into(), "C".into()],
        };

        gate.preacknowledge(&"call-1".into(), &pending);
        let acked = gate.clear(&"call-1".into(), &action, &pending).await.unwrap();
        assert_eq!(acked, pending);

        // identical action and checks, different call id: refused again
        let err = gate
            .clear(&"call-2".into(), &action, &pending)
            .await
            .unwrap_err();
        assert_eq!(err.checks[0].id, "sc1");
    }

    #[tokio::test]
    async fn host_policy_flags_are_appended_to_pending() {
        let policy = KeyComboPolicy::new(vec![vec!["ctrl".into(), "alt".into(), "delete".into()]]);
        let gate = SafetyGate::new(Box::new(policy), Box::new(AcceptAll));
        let action = Action::Keypress {
            keys: vec!["CTRL".into(), "ALT".into(), "DELETE".into()],
        };
        let acked = gate.clear(&"c3".into(), &action, &[]).await.unwrap();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].code, "host_policy");
    }

    #[test]
    fn domain_policy_matches_by_suffix() {
        let policy = DomainPolicy::new(vec!["bad.example".into()]);
        let flagged = policy.check(&Action::Goto {
            url: "https://login.bad.example/path?q=1".into(),
        });
        assert!(matches!(flagged, Verdict::Blocked { .. }));
        let clear = policy.check(&Action::Goto {
            url: "https://goodbad.example.org".into(),
        });
        assert_eq!(clear, Verdict::Clear);
    }

    #[test]
    fn policy_set_returns_first_block() {
        let set = PolicySet::new(vec![
            Box::new(AllowAll),
            Box::new(DomainPolicy::new(vec!["blocked.test".into()])),
        ]);
        assert!(matches!(
            set.check(&Action::Goto {
                url: "http://blocked.test".into()
            }),
            Verdict::Blocked { .. }
        ));
        assert_eq!(set.check(&click()), Verdict::Clear);
    }
}
