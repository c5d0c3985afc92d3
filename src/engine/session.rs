//! Flat key-value form of the user-facing session: selections, policy
//! overrides and fold state.
//!
//! Keys:
//! - `algorithms`, `domains`, `metrics`: JSON string lists
//! - `aggregator.<metric>`: `sum` | `mean` | `gmean`
//! - `min_wins.<metric>`: `true` | `false`
//! - `expanded.<metric>`: JSON string list of expanded domains

use std::collections::{BTreeMap, BTreeSet};

use super::fold::FoldState;
use super::SelectionError;
use crate::metrics::PolicyOverride;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub algorithms: Vec<String>,
    pub domains: Vec<String>,
    pub metrics: Vec<String>,
    pub overrides: BTreeMap<String, PolicyOverride>,
    pub fold: FoldState,
}

fn encode_list<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    serde_json::Value::from(items.into_iter().cloned().collect::<Vec<String>>()).to_string()
}

fn decode_list(key: &str, raw: &str) -> Result<Vec<String>, SelectionError> {
    serde_json::from_str(raw).map_err(|e| SelectionError::InvalidSessionValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl SessionState {
    pub fn to_flat(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("algorithms".to_string(), encode_list(&self.algorithms));
        out.insert("domains".to_string(), encode_list(&self.domains));
        out.insert("metrics".to_string(), encode_list(&self.metrics));
        for (metric, o) in &self.overrides {
            if let Some(agg) = o.aggregator {
                out.insert(format!("aggregator.{}", metric), agg.as_str().to_string());
            }
            if let Some(min_wins) = o.min_wins {
                out.insert(format!("min_wins.{}", metric), min_wins.to_string());
            }
        }
        for (metric, domains) in &self.fold.expanded {
            out.insert(format!("expanded.{}", metric), encode_list(domains));
        }
        out
    }

    /// Parse the flat form. Only syntax is checked here; names are
    /// validated against the dataset on restore.
    pub fn from_flat(flat: &BTreeMap<String, String>) -> Result<Self, SelectionError> {
        let mut state = SessionState::default();
        for (key, raw) in flat {
            let invalid = |reason: String| SelectionError::InvalidSessionValue {
                key: key.clone(),
                reason,
            };
            match key.split_once('.') {
                None => match key.as_str() {
                    "algorithms" => state.algorithms = decode_list(key, raw)?,
                    "domains" => state.domains = decode_list(key, raw)?,
                    "metrics" => state.metrics = decode_list(key, raw)?,
                    _ => return Err(invalid("unknown key".to_string())),
                },
                Some(("aggregator", metric)) => {
                    let agg = raw.parse().map_err(invalid)?;
                    state.overrides.entry(metric.to_string()).or_default().aggregator = Some(agg);
                }
                Some(("min_wins", metric)) => {
                    let min_wins = raw
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?;
                    state.overrides.entry(metric.to_string()).or_default().min_wins = Some(min_wins);
                }
                Some(("expanded", metric)) => {
                    let domains: BTreeSet<String> = decode_list(key, raw)?.into_iter().collect();
                    state.fold.expanded.insert(metric.to_string(), domains);
                }
                Some(_) => return Err(invalid("unknown key".to_string())),
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Aggregator;

    fn sample() -> SessionState {
        let mut state = SessionState {
            algorithms: vec!["lama".into(), "ff".into()],
            domains: vec!["gripper".into()],
            metrics: vec!["cost".into(), "expansions".into()],
            ..Default::default()
        };
        state.overrides.insert(
            "expansions".into(),
            PolicyOverride { aggregator: Some(Aggregator::Sum), min_wins: Some(false) },
        );
        state
            .fold
            .expanded
            .insert("cost".into(), BTreeSet::from(["gripper".to_string()]));
        state
    }

    #[test]
    fn test_flat_keys() {
        let flat = sample().to_flat();
        assert_eq!(flat.get("algorithms").map(String::as_str), Some(r#"["lama","ff"]"#));
        assert_eq!(flat.get("aggregator.expansions").map(String::as_str), Some("sum"));
        assert_eq!(flat.get("min_wins.expansions").map(String::as_str), Some("false"));
        assert_eq!(flat.get("expanded.cost").map(String::as_str), Some(r#"["gripper"]"#));
    }

    #[test]
    fn test_flat_round_trip() {
        let state = sample();
        assert_eq!(SessionState::from_flat(&state.to_flat()).unwrap(), state);
    }

    #[test]
    fn test_dotted_metric_names_survive() {
        let mut flat = BTreeMap::new();
        flat.insert("min_wins.score.v2".to_string(), "true".to_string());
        let state = SessionState::from_flat(&flat).unwrap();
        assert_eq!(state.overrides["score.v2"].min_wins, Some(true));
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut flat = BTreeMap::new();
        flat.insert("aggregator.cost".to_string(), "median".to_string());
        assert!(matches!(
            SessionState::from_flat(&flat),
            Err(SelectionError::InvalidSessionValue { .. })
        ));

        let mut flat = BTreeMap::new();
        flat.insert("algorithms".to_string(), "lama,ff".to_string());
        assert!(SessionState::from_flat(&flat).is_err());

        let mut flat = BTreeMap::new();
        flat.insert("colour".to_string(), "red".to_string());
        assert!(SessionState::from_flat(&flat).is_err());
    }
}
