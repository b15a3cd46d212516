//! Regex-based admission of proxy endpoints.

use crate::errors::{Result, SpeedTestError};
use crate::proxy::ProxyEndpoint;
use log::debug;
use regex::Regex;

/// Compiled `filter`/`block` rules.
///
/// Patterns are compiled once in [`ProxySelector::new`] and reused for
/// every selection. An endpoint is admitted iff its name matches the filter
/// (an empty filter matches everything) and does not match the block
/// pattern (an empty block pattern rejects nothing).
#[derive(Debug, Clone, Default)]
pub struct ProxySelector {
    filter: Option<Regex>,
    block: Option<Regex>,
}

impl ProxySelector {
    /// Compile the filter and block patterns.
    ///
    /// # Arguments
    /// * `filter` - Names to admit; empty admits all
    /// * `block` - Names to reject; empty rejects none
    ///
    /// # Returns
    /// The selector, or an `InvalidPattern` error naming the bad pattern
    pub fn new(filter: &str, block: &str) -> Result<Self> {
        Ok(Self {
            filter: compile("filter", filter)?,
            block: compile("block", block)?,
        })
    }

    /// Whether a single endpoint is admitted.
    pub fn admits(&self, endpoint: &ProxyEndpoint) -> bool {
        let name = endpoint.name.as_str();
        let wanted = self.filter.as_ref().is_none_or(|re| re.is_match(name));
        let blocked = self.block.as_ref().is_some_and(|re| re.is_match(name));
        wanted && !blocked
    }

    /// Admitted endpoints, in input order.
    pub fn select(&self, candidates: &[ProxyEndpoint]) -> Vec<ProxyEndpoint> {
        let selected: Vec<ProxyEndpoint> = candidates
            .iter()
            .filter(|endpoint| self.admits(endpoint))
            .cloned()
            .collect();

        debug!(
            "Selected {} of {} proxies",
            selected.len(),
            candidates.len()
        );

        selected
    }
}

/// One-shot selection: compile the patterns and apply them.
pub fn select(
    candidates: &[ProxyEndpoint],
    filter: &str,
    block: &str,
) -> Result<Vec<ProxyEndpoint>> {
    Ok(ProxySelector::new(filter, block)?.select(candidates))
}

fn compile(field: &str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }

    Regex::new(pattern)
        .map(Some)
        .map_err(|e| SpeedTestError::invalid_pattern(field, pattern, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::proxy::ProxyKind;
    use proptest::prelude::*;

    fn endpoint(name: &str) -> ProxyEndpoint {
        ProxyEndpoint::new(name, ProxyKind::Socks5, "127.0.0.1", 1080)
    }

    fn endpoints(names: &[&str]) -> Vec<ProxyEndpoint> {
        names.iter().map(|name| endpoint(name)).collect()
    }

    fn names(endpoints: &[ProxyEndpoint]) -> Vec<&str> {
        endpoints.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_filter_and_block() {
        let candidates = endpoints(&["HK 01", "HK 02 (expired)", "US 01", "JP"]);
        let selector = ProxySelector::new("HK|US", "expired").unwrap();

        let selected = selector.select(&candidates);
        assert_eq!(names(&selected), vec!["HK 01", "US 01"]);
    }

    #[test]
    fn test_block_only() {
        let candidates = endpoints(&["a", "b", "c"]);
        let selected = select(&candidates, "", "^b$").unwrap();
        assert_eq!(names(&selected), vec!["a", "c"]);
    }

    #[test]
    fn test_selector_reused_across_selections() {
        let selector = ProxySelector::new("^x", "").unwrap();
        assert_eq!(selector.select(&endpoints(&["x1", "y1"])).len(), 1);
        assert_eq!(selector.select(&endpoints(&["x2", "x3"])).len(), 2);
    }

    #[test]
    fn test_invalid_filter() {
        let error = ProxySelector::new("([", "").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidPattern);
        assert!(error.message.starts_with("filter"));
    }

    #[test]
    fn test_invalid_block() {
        let error = ProxySelector::new("", "*bad").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidPattern);
        assert!(error.message.starts_with("block"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_select_is_admitted_subset(
            names in prop::collection::vec("[a-d]{1,4}", 0..20),
            filter in "[a-d]{0,2}",
            block in "[a-d]{0,2}",
        ) {
            let candidates: Vec<ProxyEndpoint> =
                names.iter().map(|name| endpoint(name)).collect();
            let selected = select(&candidates, &filter, &block).unwrap();

            prop_assert!(selected.len() <= candidates.len());
            for endpoint in &selected {
                prop_assert!(filter.is_empty() || endpoint.name.contains(&filter));
                prop_assert!(block.is_empty() || !endpoint.name.contains(&block));
            }

            // Output keeps input order.
            let mut remaining = candidates.iter();
            for endpoint in &selected {
                prop_assert!(remaining.any(|c| c == endpoint));
            }
        }

        #[test]
        fn prop_empty_patterns_are_identity(
            names in prop::collection::vec(".{0,8}", 0..20),
        ) {
            let candidates: Vec<ProxyEndpoint> =
                names.iter().map(|name| endpoint(name)).collect();
            let selected = select(&candidates, "", "").unwrap();
            prop_assert_eq!(selected, candidates);
        }
    }
}
