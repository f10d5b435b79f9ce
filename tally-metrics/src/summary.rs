use std::ops::Index;

use serde::Serialize;
use tally_common::UnixTimestamp;

/// A single named value of a [`StatsSummary`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsValue {
    /// The full name of the series, such as `stats.timers.request.mean`.
    pub name: String,
    /// The summarized value.
    pub value: f64,
}

impl StatsValue {
    /// Creates a new named value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// The immutable result of a single flush.
///
/// Values are ordered by kind: gauges first, then timers, then counters. Within each kind, series
/// are sorted by metric name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSummary {
    timestamp: UnixTimestamp,
    values: Vec<StatsValue>,
}

impl StatsSummary {
    /// Creates a summary from a list of values.
    pub fn new(timestamp: UnixTimestamp, values: Vec<StatsValue>) -> Self {
        Self { timestamp, values }
    }

    /// Creates a summary without values.
    pub fn empty(timestamp: UnixTimestamp) -> Self {
        Self::new(timestamp, Vec::new())
    }

    /// Returns the time at which this summary was flushed.
    pub fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the summary has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over all values in order.
    pub fn iter(&self) -> std::slice::Iter<'_, StatsValue> {
        self.values.iter()
    }

    /// Returns the value of the series with the given full name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

impl Index<usize> for StatsSummary {
    type Output = StatsValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl<'a> IntoIterator for &'a StatsSummary {
    type Item = &'a StatsValue;
    type IntoIter = std::slice::Iter<'a, StatsValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for StatsSummary {
    type Item = StatsValue;
    type IntoIter = std::vec::IntoIter<StatsValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let summary = StatsSummary::new(
            UnixTimestamp::from_secs(4711),
            vec![
                StatsValue::new("stats.gauges.a", 1.0),
                StatsValue::new("stats_counts.b", 2.0),
            ],
        );

        assert_eq!(summary.len(), 2);
        assert_eq!(summary.get("stats_counts.b"), Some(2.0));
        assert_eq!(summary.get("missing"), None);
        assert_eq!(summary[0].name, "stats.gauges.a");
    }

    #[test]
    fn test_serialize() {
        let summary = StatsSummary::new(
            UnixTimestamp::from_secs(4711),
            vec![StatsValue::new("stats.gauges.a", 1.5)],
        );

        insta::assert_json_snapshot!(summary, @r###"
        {
          "timestamp": 4711,
          "values": [
            {
              "name": "stats.gauges.a",
              "value": 1.5
            }
          ]
        }
        "###);
    }
}
