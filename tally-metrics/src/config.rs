use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameters used by the [`StatsCollection`](crate::StatsCollection) when summarizing.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Percentiles computed for every timer, each in the range `(0, 100]`.
    ///
    /// Defaults to an empty list, in which case only the unconditional timer statistics are
    /// reported.
    pub percentiles: Vec<f64>,

    /// Multiplicative scale factors applied to gauges and timers of the given name.
    ///
    /// Scales are applied when summarizing, the aggregated raw values are never changed. Names
    /// without an entry use a scale of `1.0`.
    pub scales: BTreeMap<String, f64>,
}

impl CollectionConfig {
    /// Returns the scale factor for the given metric name.
    pub fn scale(&self, name: &str) -> f64 {
        self.scales.get(name).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scale() {
        let mut config = CollectionConfig::default();
        assert_eq!(config.scale("foo"), 1.0);

        config.scales.insert("foo".to_owned(), 0.001);
        assert_eq!(config.scale("foo"), 0.001);
        assert_eq!(config.scale("bar"), 1.0);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CollectionConfig = serde_json::from_str(r#"{"percentiles": [90, 99.5]}"#).unwrap();
        assert_eq!(config.percentiles, [90.0, 99.5]);
        assert!(config.scales.is_empty());
    }
}
