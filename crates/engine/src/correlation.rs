//! Event correlation key generation.
//!
//! An inbound event carries an ordered list of correlation parameters. A
//! subscription may have been registered with any subset of them, so the
//! event is matched against a key for every contiguous window over the
//! parameter list: `n(n+1)/2` candidates instead of `2^n - 1`. The order in
//! which callers declare parameters therefore decides which partial
//! matches are possible.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// A name/value pair extracted from an inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl CorrelationParameter {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A derived key together with the parameters that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationKey {
    pub value: String,
    pub parameters: Vec<CorrelationParameter>,
}

impl CorrelationKey {
    /// Derive the key for a set of parameters.
    ///
    /// The value is the hex SHA-256 of the parameters as a JSON object with
    /// sorted names, so it does not depend on parameter order.
    pub fn derive(parameters: &[CorrelationParameter]) -> Self {
        let canonical: BTreeMap<&str, &serde_json::Value> = parameters
            .iter()
            .map(|parameter| (parameter.name.as_str(), &parameter.value))
            .collect();
        // String keys and JSON values always serialize.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();

        Self {
            value: hex::encode(Sha256::digest(&encoded)),
            parameters: parameters.to_vec(),
        }
    }
}

/// Generate the candidate keys for an event's parameters.
///
/// Windows are enumerated by size, then by start offset. A window whose key
/// value was already produced is skipped, so the first (smallest, leftmost)
/// parameter subset is kept for each distinct value.
pub fn generate_correlation_keys(parameters: &[CorrelationParameter]) -> Vec<CorrelationKey> {
    let count = parameters.len();
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    for size in 1..=count {
        for start in 0..=(count - size) {
            let key = CorrelationKey::derive(&parameters[start..start + size]);
            if seen.insert(key.value.clone()) {
                keys.push(key);
            }
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Vec<CorrelationParameter> {
        pairs
            .iter()
            .map(|(name, value)| CorrelationParameter::new(*name, value.clone()))
            .collect()
    }

    #[test]
    fn test_no_parameters_no_keys() {
        assert!(generate_correlation_keys(&[]).is_empty());
    }

    #[test]
    fn test_single_parameter_single_key() {
        let keys = generate_correlation_keys(&params(&[("orderId", json!("o-1"))]));
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].parameters.len(), 1);
    }

    #[test]
    fn test_contiguous_windows() {
        let parameters = params(&[
            ("orderId", json!("o-1")),
            ("customerId", json!("c-9")),
            ("region", json!("eu")),
        ]);
        let keys = generate_correlation_keys(&parameters);

        // 3 singles, 2 pairs, 1 full window
        assert_eq!(keys.len(), 6);
        let sizes: Vec<usize> = keys.iter().map(|k| k.parameters.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1, 2, 2, 3]);

        // Full window is always produced
        let full = CorrelationKey::derive(&parameters);
        assert!(keys.iter().any(|k| k.value == full.value));

        // Non-contiguous subset {orderId, region} is not a candidate
        let gap = CorrelationKey::derive(&[parameters[0].clone(), parameters[2].clone()]);
        assert!(!keys.iter().any(|k| k.value == gap.value));
    }

    #[test]
    fn test_key_ignores_parameter_order() {
        let forward = params(&[("a", json!(1)), ("b", json!(2))]);
        let backward = params(&[("b", json!(2)), ("a", json!(1))]);
        assert_eq!(
            CorrelationKey::derive(&forward).value,
            CorrelationKey::derive(&backward).value
        );
    }

    #[test]
    fn test_colliding_windows_keep_first_subset() {
        let parameters = params(&[("a", json!(1)), ("a", json!(1))]);
        let keys = generate_correlation_keys(&parameters);

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].parameters, vec![parameters[0].clone()]);
    }

    #[test]
    fn test_value_is_hex_sha256() {
        let key = CorrelationKey::derive(&params(&[("a", json!(1))]));
        assert_eq!(key.value.len(), 64);
        assert!(key.value.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
