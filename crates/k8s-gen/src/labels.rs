use std::collections::BTreeMap;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "floe";
pub const DOMAIN_LABEL: &str = "floe.dev/domain";
pub const SOURCE_HASH_LABEL: &str = "floe.dev/source-hash";

/// Base labels every generated object carries.
///
/// Label values are capped at 63 characters and cannot contain `:`, so the
/// source hash is carried as a short digest without its `sha256:` prefix.
pub(crate) fn base_labels(source_hash: &str, domain: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(
        SOURCE_HASH_LABEL.to_string(),
        short_digest(source_hash).to_string(),
    );
    if let Some(domain) = domain {
        labels.insert(DOMAIN_LABEL.to_string(), domain.to_string());
    }
    labels
}

pub(crate) fn short_digest(source_hash: &str) -> &str {
    let hex = source_hash.strip_prefix("sha256:").unwrap_or(source_hash);
    &hex[..hex.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_digest_strips_prefix_and_truncates() {
        assert_eq!(
            short_digest("sha256:0123456789abcdef0123456789abcdef"),
            "0123456789ab"
        );
        assert_eq!(short_digest("abc"), "abc");
    }

    #[test]
    fn base_labels_include_domain_when_given() {
        let labels = base_labels("sha256:feedface0000", Some("analytics"));
        assert_eq!(labels[MANAGED_BY_LABEL], "floe");
        assert_eq!(labels[DOMAIN_LABEL], "analytics");
        assert_eq!(labels[SOURCE_HASH_LABEL], "feedface0000");
    }
}
