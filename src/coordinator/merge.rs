// src/coordinator/merge.rs

use crate::types::Options;

/// Merge contributions in registration order. On a key collision the later
/// contribution wins.
pub fn merge_contributions<I>(contributions: I) -> Options
where
    I: IntoIterator<Item = Options>,
{
    let mut shared = Options::new();
    for contribution in contributions {
        shared.extend(contribution);
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn opts(value: Value) -> Options {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn disjoint_keys_union() {
        let shared = merge_contributions([
            opts(json!({ "a": 1 })),
            opts(json!({ "b": 2 })),
            Options::new(),
        ]);
        assert_eq!(shared, opts(json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn later_contribution_wins() {
        let shared = merge_contributions([
            opts(json!({ "port": 1, "host": "a" })),
            opts(json!({ "port": 2 })),
        ]);
        assert_eq!(shared, opts(json!({ "port": 2, "host": "a" })));
    }

    #[test]
    fn nested_values_are_replaced_not_merged() {
        let shared = merge_contributions([
            opts(json!({ "db": { "user": "x", "pass": "y" } })),
            opts(json!({ "db": { "user": "z" } })),
        ]);
        assert_eq!(shared["db"], json!({ "user": "z" }));
    }
}
