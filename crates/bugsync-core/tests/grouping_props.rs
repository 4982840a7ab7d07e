//! Grouping order and completeness laws

use bugsync_core::{GroupShape, GroupingEngine};
use bugsync_record::{Expression, Record};
use proptest::prelude::*;

fn records(keys: &[String]) -> Vec<Record> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| Record::new().with("seq", i).with("app", key.as_str()))
        .collect()
}

proptest! {
    #[test]
    fn groups_keep_first_seen_order(keys in prop::collection::vec("[a-d]", 0..40), force in any::<bool>()) {
        let engine = GroupingEngine::new(Expression::parse("${app}").unwrap()).with_force_grouping(force);
        let set = engine.group_records(records(&keys)).unwrap();

        let mut expected: Vec<&str> = Vec::new();
        for key in &keys {
            if !expected.contains(&key.as_str()) {
                expected.push(key);
            }
        }
        prop_assert_eq!(set.keys().collect::<Vec<_>>(), expected);
        prop_assert_eq!(set.records(), keys.len());

        for (key, group) in set.iter() {
            let seqs: Vec<u64> = group
                .records()
                .iter()
                .filter_map(|r| r.peek("seq").and_then(serde_json::Value::as_u64))
                .collect();
            let original: Vec<u64> = (0u64..)
                .zip(&keys)
                .filter(|(_, k)| k.as_str() == key)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(seqs, original);

            let single = group.len() == 1 && !force;
            prop_assert_eq!(group.shape() == GroupShape::Single, single);
        }
    }
}
