/// Manager settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Drop `instance_info` reports whose `ts` is older than the stored one.
    pub reject_stale_reports: bool,
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let reject_stale_reports = lookup("METAHOST_REJECT_STALE_REPORTS")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(false);

        Self {
            reject_stale_reports,
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ManagerConfig::from_lookup(lookup(&[])), ManagerConfig::default());
    }

    #[test]
    fn test_stale_guard_flag() {
        for raw in ["true", "1", "YES", " on "] {
            let config = ManagerConfig::from_lookup(lookup(&[("METAHOST_REJECT_STALE_REPORTS", raw)]));
            assert!(config.reject_stale_reports, "{raw}");
        }
        let config = ManagerConfig::from_lookup(lookup(&[("METAHOST_REJECT_STALE_REPORTS", "nope")]));
        assert!(!config.reject_stale_reports);
    }
}
