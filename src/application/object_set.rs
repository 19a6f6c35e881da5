use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::value_objects::{ObjectDescriptor, ObjectType};

/// Object lists of both databases split into common and one-sided parts,
/// each sorted by `(type, name)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectSetDiff {
    pub common: Vec<ObjectDescriptor>,
    pub only_source: Vec<ObjectDescriptor>,
    pub only_target: Vec<ObjectDescriptor>,
}

impl ObjectSetDiff {
    pub fn is_identical(&self) -> bool {
        self.only_source.is_empty() && self.only_target.is_empty()
    }
}

pub fn compare_object_sets(source: &[ObjectDescriptor], target: &[ObjectDescriptor]) -> ObjectSetDiff {
    let a: BTreeSet<&ObjectDescriptor> = source.iter().collect();
    let b: BTreeSet<&ObjectDescriptor> = target.iter().collect();

    ObjectSetDiff {
        common: a.intersection(&b).map(|o| (*o).clone()).collect(),
        only_source: a.difference(&b).map(|o| (*o).clone()).collect(),
        only_target: b.difference(&a).map(|o| (*o).clone()).collect(),
    }
}

/// Number of objects per type.
pub fn type_counts(objects: &[ObjectDescriptor]) -> BTreeMap<ObjectType, usize> {
    let mut counts = BTreeMap::new();
    for o in objects {
        *counts.entry(o.object_type).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(t: ObjectType, name: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(t, name)
    }

    #[test]
    fn splits_common_and_one_sided_objects() {
        let source = vec![
            obj(ObjectType::Table, "users"),
            obj(ObjectType::View, "active_users"),
            obj(ObjectType::Table, "orders"),
        ];
        let target = vec![
            obj(ObjectType::Table, "orders"),
            obj(ObjectType::Table, "users"),
            obj(ObjectType::Trigger, "audit"),
        ];
        let d = compare_object_sets(&source, &target);
        assert_eq!(
            d.common,
            vec![obj(ObjectType::Table, "orders"), obj(ObjectType::Table, "users")]
        );
        assert_eq!(d.only_source, vec![obj(ObjectType::View, "active_users")]);
        assert_eq!(d.only_target, vec![obj(ObjectType::Trigger, "audit")]);
        assert!(!d.is_identical());
    }

    #[test]
    fn same_name_different_type_is_not_common() {
        let d = compare_object_sets(
            &[obj(ObjectType::Table, "x")],
            &[obj(ObjectType::View, "x")],
        );
        assert!(d.common.is_empty());
        assert_eq!(d.only_source.len(), 1);
        assert_eq!(d.only_target.len(), 1);
    }

    #[test]
    fn duplicates_collapse() {
        let list = vec![obj(ObjectType::Table, "a"), obj(ObjectType::Table, "a")];
        let d = compare_object_sets(&list, &list);
        assert_eq!(d.common.len(), 1);
        assert!(d.is_identical());
    }

    #[test]
    fn counts_per_type() {
        let counts = type_counts(&[
            obj(ObjectType::Table, "a"),
            obj(ObjectType::Table, "b"),
            obj(ObjectType::View, "v"),
        ]);
        assert_eq!(counts[&ObjectType::Table], 2);
        assert_eq!(counts[&ObjectType::View], 1);
        assert!(!counts.contains_key(&ObjectType::Event));
    }
}
