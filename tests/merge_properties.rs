use std::collections::BTreeMap;

use lockstep::coordinator::merge_contributions;
use lockstep::types::Options;
use proptest::prelude::*;
use serde_json::Value;

// Contributions drawn from a small key space so that collisions are common.
fn contributions_strategy() -> impl Strategy<Value = Vec<Options>> {
    proptest::collection::vec(
        proptest::collection::btree_map("[a-e]", any::<i64>(), 0..4),
        1..6,
    )
    .prop_map(|maps| {
        maps.into_iter()
            .map(|map| {
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Options>()
            })
            .collect::<Vec<_>>()
    })
}

proptest! {
    #[test]
    fn disjoint_contributions_merge_to_their_union(
        values in proptest::collection::vec(any::<i64>(), 1..8)
    ) {
        let contributions: Vec<Options> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut options = Options::new();
                options.insert(format!("worker_{i}"), Value::from(*v));
                options
            })
            .collect();

        let shared = merge_contributions(contributions);

        prop_assert_eq!(shared.len(), values.len());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(&shared[&format!("worker_{i}")], &Value::from(*v));
        }
    }

    #[test]
    fn every_key_takes_its_last_registered_value(contributions in contributions_strategy()) {
        // Expected result computed independently: walk from the back.
        let mut expected = BTreeMap::new();
        for contribution in contributions.iter().rev() {
            for (key, value) in contribution {
                expected.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let shared = merge_contributions(contributions.clone());

        prop_assert_eq!(shared.len(), expected.len());
        for (key, value) in &expected {
            prop_assert_eq!(shared.get(key), Some(value));
        }
    }
}
