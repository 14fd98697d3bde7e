use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{VerifyError, VerifyResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    Enforce,
    Warn,
    Off,
}

/// One identity the policy trusts: an OIDC issuer plus exactly one way of
/// matching the certificate subject.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TrustedIssuer {
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_regex: Option<String>,
}

impl TrustedIssuer {
    pub(crate) fn matches(&self, issuer: &str, subject: &str) -> bool {
        if self.issuer != issuer {
            return false;
        }
        match (&self.subject, &self.subject_regex) {
            (Some(expected), None) => expected == subject,
            (None, Some(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(subject))
                .unwrap_or(false),
            // rejected at load time
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentPolicy {
    pub enforcement: EnforcementMode,
}

/// Signature verification policy, layered per environment.
///
/// ```yaml
/// enabled: true
/// enforcement: warn
/// environments:
///   production:
///     enforcement: enforce
/// trusted_issuers:
///   - issuer: https://token.actions.githubusercontent.com
///     subject_regex: ^https://github\.com/acme/.*$
/// grace_period_days: 7
/// require_rekor: true
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct VerificationPolicy {
    pub enabled: bool,
    pub enforcement: EnforcementMode,
    pub environments: BTreeMap<String, EnvironmentPolicy>,
    pub trusted_issuers: Vec<TrustedIssuer>,
    /// Days after certificate expiry during which verification still
    /// accepts it, to survive rotation windows.
    pub grace_period_days: i64,
    pub require_rekor: bool,
    pub require_sbom: bool,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        VerificationPolicy {
            enabled: false,
            enforcement: EnforcementMode::Warn,
            environments: BTreeMap::new(),
            trusted_issuers: Vec::new(),
            grace_period_days: 0,
            require_rekor: false,
            require_sbom: false,
        }
    }
}

impl VerificationPolicy {
    /// Per-environment enforcement wins over the top-level mode.
    pub fn effective_enforcement(&self, environment: Option<&str>) -> EnforcementMode {
        environment
            .and_then(|env| self.environments.get(env))
            .map(|policy| policy.enforcement)
            .unwrap_or(self.enforcement)
    }

    pub fn validate(&self) -> VerifyResult<()> {
        if self.grace_period_days < 0 {
            return Err(VerifyError::InvalidPolicy(
                "grace_period_days cannot be negative".to_string(),
            ));
        }
        for trusted in &self.trusted_issuers {
            match (&trusted.subject, &trusted.subject_regex) {
                (Some(_), Some(_)) => {
                    return Err(VerifyError::InvalidPolicy(format!(
                        "issuer {}: subject and subject_regex are mutually exclusive",
                        trusted.issuer
                    )))
                }
                (None, None) => {
                    return Err(VerifyError::InvalidPolicy(format!(
                        "issuer {}: one of subject or subject_regex is required",
                        trusted.issuer
                    )))
                }
                (None, Some(pattern)) => {
                    Regex::new(pattern).map_err(|e| {
                        VerifyError::InvalidPolicy(format!(
                            "issuer {}: bad subject_regex: {e}",
                            trusted.issuer
                        ))
                    })?;
                }
                (Some(_), None) => {}
            }
        }
        Ok(())
    }
}

pub fn read_policy_file(path: &Path) -> VerifyResult<VerificationPolicy> {
    let file = std::fs::File::open(path)?;
    let policy: VerificationPolicy = serde_yaml::from_reader(file)?;
    policy.validate()?;
    Ok(policy)
}

/// Starting-point policy emitted by `floectl scaffold verification-config`.
pub fn default_policy_yaml() -> String {
    let policy = VerificationPolicy {
        enabled: true,
        enforcement: EnforcementMode::Warn,
        environments: BTreeMap::from([(
            "production".to_string(),
            EnvironmentPolicy {
                enforcement: EnforcementMode::Enforce,
            },
        )]),
        trusted_issuers: vec![TrustedIssuer {
            issuer: "https://token.actions.githubusercontent.com".to_string(),
            subject: None,
            subject_regex: Some("^https://github\\.com/your-org/.*$".to_string()),
        }],
        grace_period_days: 7,
        require_rekor: true,
        require_sbom: false,
    };
    serde_yaml::to_string(&policy).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_enforcement_overrides_top_level() {
        let policy: VerificationPolicy = serde_yaml::from_str(
            r#"
enabled: true
enforcement: warn
environments:
  production:
    enforcement: enforce
"#,
        )
        .unwrap();
        assert_eq!(
            policy.effective_enforcement(Some("production")),
            EnforcementMode::Enforce
        );
        assert_eq!(
            policy.effective_enforcement(Some("staging")),
            EnforcementMode::Warn
        );
        assert_eq!(policy.effective_enforcement(None), EnforcementMode::Warn);
    }

    #[test]
    fn issuer_with_both_subject_forms_is_rejected() {
        let policy = VerificationPolicy {
            trusted_issuers: vec![TrustedIssuer {
                issuer: "https://oidc.test".to_string(),
                subject: Some("a@b.c".to_string()),
                subject_regex: Some(".*".to_string()),
            }],
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(VerifyError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn issuer_with_neither_subject_form_is_rejected() {
        let policy = VerificationPolicy {
            trusted_issuers: vec![TrustedIssuer {
                issuer: "https://oidc.test".to_string(),
                subject: None,
                subject_regex: None,
            }],
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn subject_regex_matches_and_exact_subject_compares() {
        let exact = TrustedIssuer {
            issuer: "https://oidc.test".to_string(),
            subject: Some("release@acme.dev".to_string()),
            subject_regex: None,
        };
        assert!(exact.matches("https://oidc.test", "release@acme.dev"));
        assert!(!exact.matches("https://oidc.test", "intern@acme.dev"));
        assert!(!exact.matches("https://other.test", "release@acme.dev"));

        let pattern = TrustedIssuer {
            issuer: "https://oidc.test".to_string(),
            subject: None,
            subject_regex: Some("^https://github\\.com/acme/.*$".to_string()),
        };
        assert!(pattern.matches("https://oidc.test", "https://github.com/acme/floe/release"));
        assert!(!pattern.matches("https://oidc.test", "https://github.com/evil/floe"));
    }

    #[test]
    fn unknown_policy_fields_are_rejected() {
        let result: Result<VerificationPolicy, _> =
            serde_yaml::from_str("enabled: true\nallow_anything: true\n");
        assert!(result.is_err());
    }

    #[test]
    fn scaffolded_policy_parses_and_validates() {
        let policy: VerificationPolicy =
            serde_yaml::from_str(&default_policy_yaml()).unwrap();
        policy.validate().unwrap();
        assert!(policy.enabled);
    }
}
