//! Result values and the in-process combinators composite metrics are evaluated with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const NULL_VALUE: &str = "null";
pub const GROUP_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Bucket start, epoch milliseconds.
    pub timestamp: String,
    pub value: String,
}

impl MetricPoint {
    pub fn new(timestamp: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// One metric's result. Exactly one of the three shapes is populated, matching the
/// definition's type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pie: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub time_series: BTreeMap<String, Vec<MetricPoint>>,
}

impl MetricValue {
    pub fn summary(value: impl Into<String>) -> Self {
        Self {
            summary: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.pie.is_empty() && self.time_series.is_empty()
    }
}

/// Renders a float the way results are reported: shortest form, `"null"` when not finite.
pub fn format_number(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        NULL_VALUE.to_string()
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `"null"` unless the numerator is non-negative and the denominator positive.
pub fn divide_number(numerator: &str, denominator: &str) -> String {
    match (parse_number(numerator), parse_number(denominator)) {
        (Some(n), Some(d)) if n >= 0.0 && d > 0.0 => format_number(n / d),
        _ => NULL_VALUE.to_string(),
    }
}

/// Pointwise `numerator / denominator`. Series divide by series (matched on group and
/// timestamp) or by a summary; summaries divide by summaries.
pub fn divide(numerator: &MetricValue, denominator: &MetricValue) -> MetricValue {
    let mut out = MetricValue::default();
    if let (Some(n), Some(d)) = (&numerator.summary, &denominator.summary) {
        out.summary = Some(divide_number(n, d));
    }
    for (group, points) in &numerator.time_series {
        let divided = match (&denominator.summary, denominator.time_series.get(group)) {
            (_, Some(den_points)) => {
                let by_ts: BTreeMap<&str, &str> = den_points
                    .iter()
                    .map(|p| (p.timestamp.as_str(), p.value.as_str()))
                    .collect();
                points
                    .iter()
                    .map(|p| {
                        let value = by_ts
                            .get(p.timestamp.as_str())
                            .map(|d| divide_number(&p.value, d))
                            .unwrap_or_else(|| NULL_VALUE.to_string());
                        MetricPoint::new(p.timestamp.clone(), value)
                    })
                    .collect()
            }
            (Some(d), None) => points
                .iter()
                .map(|p| MetricPoint::new(p.timestamp.clone(), divide_number(&p.value, d)))
                .collect(),
            (None, None) => points
                .iter()
                .map(|p| MetricPoint::new(p.timestamp.clone(), NULL_VALUE))
                .collect(),
        };
        out.time_series.insert(group.clone(), divided);
    }
    out
}

/// Folds named summaries into one pie keyed by name.
pub fn pie(named: &[(String, MetricValue)]) -> MetricValue {
    let mut out = MetricValue::default();
    for (name, value) in named {
        let slice = value
            .summary
            .clone()
            .unwrap_or_else(|| NULL_VALUE.to_string());
        out.pie.insert(name.clone(), slice);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(group: &str, points: &[(i64, &str)]) -> MetricValue {
        let mut v = MetricValue::default();
        v.time_series.insert(
            group.to_string(),
            points
                .iter()
                .map(|(ts, val)| MetricPoint::new(ts.to_string(), *val))
                .collect(),
        );
        v
    }

    #[test]
    fn divide_number_guards() {
        assert_eq!(divide_number("3", "2"), "1.5");
        assert_eq!(divide_number("4", "2"), "2");
        assert_eq!(divide_number("0", "5"), "0");
        assert_eq!(divide_number("1", "0"), NULL_VALUE);
        assert_eq!(divide_number("-1", "2"), NULL_VALUE);
        assert_eq!(divide_number("NaN", "2"), NULL_VALUE);
        assert_eq!(divide_number("null", "2"), NULL_VALUE);
    }

    #[test]
    fn series_over_series_aligns_on_timestamp() {
        let n = series(GROUP_ALL, &[(0, "10"), (60_000, "6"), (120_000, "1")]);
        let d = series(GROUP_ALL, &[(0, "5"), (60_000, "0")]);
        let got = divide(&n, &d);
        let values: Vec<&str> = got.time_series[GROUP_ALL]
            .iter()
            .map(|p| p.value.as_str())
            .collect();
        assert_eq!(values, vec!["2", NULL_VALUE, NULL_VALUE]);
    }

    #[test]
    fn series_over_summary_and_summary_over_summary() {
        let n = series(GROUP_ALL, &[(0, "9"), (60_000, "3")]);
        let got = divide(&n, &MetricValue::summary("3"));
        assert_eq!(got.time_series[GROUP_ALL][0].value, "3");
        assert_eq!(got.time_series[GROUP_ALL][1].value, "1");

        let s = divide(&MetricValue::summary("7000"), &MetricValue::summary("4"));
        assert_eq!(s.summary.as_deref(), Some("1750"));
        assert!(s.time_series.is_empty());
    }

    #[test]
    fn pie_from_summaries() {
        let got = pie(&[
            ("model".to_string(), MetricValue::summary("3")),
            ("tool".to_string(), MetricValue::default()),
        ]);
        assert_eq!(got.pie["model"], "3");
        assert_eq!(got.pie["tool"], NULL_VALUE);
        assert!(got.summary.is_none());
    }
}
