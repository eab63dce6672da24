use serde_json::Value;
use std::collections::HashMap;

/// A token-usage snapshot: an open mapping of counter name to value.
///
/// Most keys are integers (`prompt_tokens`, `completion_tokens`, ...) but the
/// map is intentionally untyped past that — transports are free to add
/// provider-specific counters, and the merge rule below treats any numeric
/// value generically.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Usage(pub HashMap<String, Value>);

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Right-biased overlay: every key in `other` replaces the same key in
    /// `self`, numeric or not.
    pub fn overlay(&self, other: &Usage) -> Usage {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        Usage(merged)
    }

    /// Right-biased overlay where numeric values are *added* instead of
    /// replaced; non-numeric values still overwrite.
    pub fn overlay_numeric_add(&self, delta: &Usage) -> Usage {
        let mut merged = self.0.clone();
        for (k, v) in &delta.0 {
            match (merged.get(k).and_then(Value::as_f64), v.as_f64()) {
                (Some(base), Some(add)) => {
                    let sum = base + add;
                    let as_value = if sum.fract() == 0.0 {
                        Value::from(sum as i64)
                    } else {
                        Value::from(sum)
                    };
                    merged.insert(k.clone(), as_value);
                }
                _ => {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        Usage(merged)
    }

    /// Implements the EventFold usage-merge rule (see the engine's
    /// `ThreadTokenUsageUpdated` handling): prefer a full `usage` overlay
    /// when present, otherwise fold in a delta, numeric keys additive.
    pub fn fold(current: &Usage, usage: Option<&Usage>, delta: Option<&Usage>) -> Usage {
        match (usage, delta) {
            (Some(u), _) if !u.is_empty() => {
                let mut base = current.overlay(u);
                if let Some(d) = delta {
                    for (k, v) in &d.0 {
                        if !u.0.contains_key(k) {
                            base = base.overlay_numeric_add(&Usage(
                                [(k.clone(), v.clone())].into_iter().collect(),
                            ));
                        }
                    }
                }
                base
            }
            (_, Some(d)) => current.overlay_numeric_add(d),
            (Some(u), None) => current.overlay(u),
            (None, None) => current.clone(),
        }
    }

    /// Right-biased overlay with numeric addition, used to merge usage
    /// across turns (`merge_usage/2` in the design notes).
    pub fn merge(a: &Usage, b: &Usage) -> Usage {
        a.overlay_numeric_add(b)
    }
}

impl From<HashMap<String, Value>> for Usage {
    fn from(map: HashMap<String, Value>) -> Self {
        Usage(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(pairs: &[(&str, i64)]) -> Usage {
        Usage(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn fold_prefers_full_usage_overlay() {
        let current = usage(&[("input_tokens", 10), ("output_tokens", 5)]);
        let next = usage(&[("input_tokens", 12)]);
        let folded = Usage::fold(&current, Some(&next), None);
        assert_eq!(folded.get("input_tokens"), Some(&Value::from(12)));
        assert_eq!(folded.get("output_tokens"), Some(&Value::from(5)));
    }

    #[test]
    fn fold_adds_delta_keys_not_present_in_usage() {
        let current = usage(&[("input_tokens", 10)]);
        let full = usage(&[("input_tokens", 12)]);
        let delta = usage(&[("cached_tokens", 3)]);
        let folded = Usage::fold(&current, Some(&full), Some(&delta));
        assert_eq!(folded.get("cached_tokens"), Some(&Value::from(3)));
    }

    #[test]
    fn fold_with_only_delta_adds_numerically() {
        let current = usage(&[("output_tokens", 5)]);
        let delta = usage(&[("output_tokens", 2)]);
        let folded = Usage::fold(&current, None, Some(&delta));
        assert_eq!(folded.get("output_tokens"), Some(&Value::from(7)));
    }

    #[test]
    fn fold_with_neither_is_identity() {
        let current = usage(&[("output_tokens", 5)]);
        let folded = Usage::fold(&current, None, None);
        assert_eq!(folded, current);
    }

    #[test]
    fn merge_is_monotonic_for_non_negative_deltas() {
        let mut running = Usage::new();
        let deltas = [
            usage(&[("output_tokens", 3)]),
            usage(&[("output_tokens", 4)]),
            usage(&[("output_tokens", 0)]),
        ];
        let mut last = 0i64;
        for d in &deltas {
            running = Usage::merge(&running, d);
            let current = running.get("output_tokens").unwrap().as_i64().unwrap();
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 7);
    }

    #[test]
    fn overlay_is_right_biased_for_non_numeric() {
        let a = Usage(
            [("status".to_string(), Value::from("partial"))]
                .into_iter()
                .collect(),
        );
        let b = Usage(
            [("status".to_string(), Value::from("complete"))]
                .into_iter()
                .collect(),
        );
        let merged = a.overlay(&b);
        assert_eq!(merged.get("status"), Some(&Value::from("complete")));
    }
}
