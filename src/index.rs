/// Lookup indexes from key tuples to source rows.
///
/// Two variants exist, chosen once per summary from its grouping key:
///
/// - `EqualityIndex` maps each full key tuple to the rows holding exactly that
///   combination. Used when every grouping column is scalar, since each source
///   row then lives under a single tuple.
/// - `MembershipIndex` keeps one posting list per (grouping column, atom) and
///   answers a tuple by intersecting the postings of its components. A source
///   row with label sets of sizes m and n costs m + n postings here instead of
///   m * n tuple entries.
///
/// # Design
///
/// Posting sets are `BTreeSet<RowId>` so matches come back in ascending row
/// order, which is the order the `group` column exposes.

use crate::error::{Result, SummaryError};
use crate::key::{GroupingKey, KeyTuple};
use crate::table::RowId;
use crate::value::Atom;
use std::collections::{BTreeSet, HashMap};

/// Full-tuple equality index for all-scalar grouping keys
#[derive(Debug, Clone, Default)]
pub struct EqualityIndex {
    postings: HashMap<KeyTuple, BTreeSet<RowId>>,
}

impl EqualityIndex {
    pub fn new() -> Self {
        EqualityIndex {
            postings: HashMap::new(),
        }
    }

    /// Returns false if the row was already posted under the tuple.
    pub fn add(&mut self, row: RowId, tuple: &KeyTuple) -> bool {
        match self.postings.get_mut(tuple) {
            Some(rows) => rows.insert(row),
            None => {
                self.postings.insert(tuple.clone(), BTreeSet::from([row]));
                true
            }
        }
    }

    /// Returns false if the row wasn't posted under the tuple.
    pub fn remove(&mut self, row: RowId, tuple: &KeyTuple) -> bool {
        let Some(rows) = self.postings.get_mut(tuple) else {
            return false;
        };
        let removed = rows.remove(&row);
        if rows.is_empty() {
            self.postings.remove(tuple);
        }
        removed
    }

    pub fn matches(&self, tuple: &KeyTuple) -> BTreeSet<RowId> {
        self.postings.get(tuple).cloned().unwrap_or_default()
    }

    /// Number of distinct tuples with at least one row
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// Per-column posting lists for grouping keys with label-set columns
#[derive(Debug, Clone)]
pub struct MembershipIndex {
    columns: Vec<HashMap<Atom, BTreeSet<RowId>>>,
}

impl MembershipIndex {
    pub fn new(width: usize) -> Self {
        MembershipIndex {
            columns: vec![HashMap::new(); width],
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn add(&mut self, row: RowId, column: usize, atom: &Atom) -> bool {
        let Some(postings) = self.columns.get_mut(column) else {
            return false;
        };
        match postings.get_mut(atom) {
            Some(rows) => rows.insert(row),
            None => {
                postings.insert(atom.clone(), BTreeSet::from([row]));
                true
            }
        }
    }

    pub fn remove(&mut self, row: RowId, column: usize, atom: &Atom) -> bool {
        let Some(postings) = self.columns.get_mut(column) else {
            return false;
        };
        let Some(rows) = postings.get_mut(atom) else {
            return false;
        };
        let removed = rows.remove(&row);
        if rows.is_empty() {
            postings.remove(atom);
        }
        removed
    }

    /// Rows whose `column` equals or contains `atom`
    pub fn postings(&self, column: usize, atom: &Atom) -> Option<&BTreeSet<RowId>> {
        self.columns.get(column).and_then(|postings| postings.get(atom))
    }

    /// Rows matching every component of the tuple.
    pub fn matches(&self, tuple: &KeyTuple) -> BTreeSet<RowId> {
        let mut lists = Vec::with_capacity(tuple.len());
        for (column, atom) in tuple.components().iter().enumerate() {
            match self.postings(column, atom) {
                Some(rows) => lists.push(rows),
                None => return BTreeSet::new(),
            }
        }

        // Walk the smallest posting list and probe the others
        lists.sort_by_key(|rows| rows.len());
        let Some((smallest, rest)) = lists.split_first() else {
            return BTreeSet::new();
        };
        smallest
            .iter()
            .filter(|row| rest.iter().all(|rows| rows.contains(*row)))
            .copied()
            .collect()
    }
}

/// A single index update produced by the change adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    AddTuple { row: RowId, tuple: KeyTuple },
    RemoveTuple { row: RowId, tuple: KeyTuple },
    AddAtom { row: RowId, column: usize, atom: Atom },
    RemoveAtom { row: RowId, column: usize, atom: Atom },
}

impl IndexOp {
    /// The op that undoes this one
    pub fn inverse(&self) -> IndexOp {
        match self.clone() {
            IndexOp::AddTuple { row, tuple } => IndexOp::RemoveTuple { row, tuple },
            IndexOp::RemoveTuple { row, tuple } => IndexOp::AddTuple { row, tuple },
            IndexOp::AddAtom { row, column, atom } => IndexOp::RemoveAtom { row, column, atom },
            IndexOp::RemoveAtom { row, column, atom } => IndexOp::AddAtom { row, column, atom },
        }
    }
}

/// The index variant owned for one summary, fixed at creation.
#[derive(Debug, Clone)]
pub enum LookupIndex {
    Equality(EqualityIndex),
    Membership(MembershipIndex),
}

impl LookupIndex {
    /// Equality index when every grouping column is scalar, membership otherwise.
    pub fn for_key(key: &GroupingKey) -> Self {
        if key.is_simple() {
            LookupIndex::Equality(EqualityIndex::new())
        } else {
            LookupIndex::Membership(MembershipIndex::new(key.width()))
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, LookupIndex::Equality(_))
    }

    /// True if the op has this variant's shape and names a column inside the key.
    pub fn accepts(&self, op: &IndexOp) -> bool {
        match (self, op) {
            (LookupIndex::Equality(_), IndexOp::AddTuple { .. } | IndexOp::RemoveTuple { .. }) => true,
            (
                LookupIndex::Membership(index),
                IndexOp::AddAtom { column, .. } | IndexOp::RemoveAtom { column, .. },
            ) => *column < index.width(),
            _ => false,
        }
    }

    /// Applies one op and returns whether the index changed. An op the
    /// index doesn't accept is an internal fault.
    pub fn apply(&mut self, op: &IndexOp) -> Result<bool> {
        let changed = match (self, op) {
            (LookupIndex::Equality(index), IndexOp::AddTuple { row, tuple }) => index.add(*row, tuple),
            (LookupIndex::Equality(index), IndexOp::RemoveTuple { row, tuple }) => index.remove(*row, tuple),
            (LookupIndex::Membership(index), IndexOp::AddAtom { row, column, atom })
                if *column < index.width() =>
            {
                index.add(*row, *column, atom)
            }
            (LookupIndex::Membership(index), IndexOp::RemoveAtom { row, column, atom })
                if *column < index.width() =>
            {
                index.remove(*row, *column, atom)
            }
            (index, op) => {
                return Err(SummaryError::stale(format!(
                    "{:?} cannot be applied to {} index",
                    op,
                    index.variant_name()
                )));
            }
        };
        Ok(changed)
    }

    fn variant_name(&self) -> &'static str {
        match self {
            LookupIndex::Equality(_) => "an equality",
            LookupIndex::Membership(_) => "a membership",
        }
    }

    pub fn matches(&self, tuple: &KeyTuple) -> BTreeSet<RowId> {
        match self {
            LookupIndex::Equality(index) => index.matches(tuple),
            LookupIndex::Membership(index) => index.matches(tuple),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDecl;
    use crate::table::Schema;

    fn tuple(atoms: &[&str]) -> KeyTuple {
        KeyTuple::from_iter(atoms.iter().copied())
    }

    fn rows(ids: &[RowId]) -> BTreeSet<RowId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_equality_add_remove() {
        let mut index = EqualityIndex::new();
        let t = tuple(&["foo"]);
        assert!(index.add(1, &t));
        assert!(!index.add(1, &t));
        assert!(index.add(2, &t));
        assert_eq!(index.matches(&t), rows(&[1, 2]));

        assert!(index.remove(1, &t));
        assert!(!index.remove(1, &t));
        assert!(!index.remove(5, &tuple(&["bar"])));
        assert_eq!(index.matches(&t), rows(&[2]));

        index.remove(2, &t);
        assert!(index.is_empty());
        assert!(index.matches(&t).is_empty());
    }

    #[test]
    fn test_membership_intersection() {
        let mut index = MembershipIndex::new(2);
        // row 1: [a] x [c], row 2: [a, b] x [c, d], row 3: [b] x [d]
        index.add(1, 0, &"a".into());
        index.add(1, 1, &"c".into());
        for atom in ["a", "b"] {
            index.add(2, 0, &atom.into());
        }
        for atom in ["c", "d"] {
            index.add(2, 1, &atom.into());
        }
        index.add(3, 0, &"b".into());
        index.add(3, 1, &"d".into());

        assert_eq!(index.matches(&tuple(&["a", "c"])), rows(&[1, 2]));
        assert_eq!(index.matches(&tuple(&["a", "d"])), rows(&[2]));
        assert_eq!(index.matches(&tuple(&["b", "d"])), rows(&[2, 3]));
        assert!(index.matches(&tuple(&["z", "d"])).is_empty());

        index.remove(2, 0, &"a".into());
        assert_eq!(index.matches(&tuple(&["a", "c"])), rows(&[1]));
        assert_eq!(index.postings(0, &"a".into()), Some(&rows(&[1])));

        index.remove(1, 0, &"a".into());
        assert!(index.postings(0, &"a".into()).is_none());
    }

    #[test]
    fn test_membership_ignores_out_of_range_columns() {
        let mut index = MembershipIndex::new(1);
        assert!(!index.add(1, 3, &"a".into()));
        assert!(!index.remove(1, 3, &"a".into()));
    }

    #[test]
    fn test_variant_follows_key() {
        let schema = Schema::new(vec![
            ColumnDecl::scalar("other"),
            ColumnDecl::multi_valued("tags"),
        ]);
        let simple = GroupingKey::from_columns(&schema, &["other"]).unwrap();
        assert!(LookupIndex::for_key(&simple).is_simple());
        let complex = GroupingKey::from_columns(&schema, &["other", "tags"]).unwrap();
        assert!(!LookupIndex::for_key(&complex).is_simple());
    }

    #[test]
    fn test_apply_rejects_mismatched_op() {
        let mut index = LookupIndex::Equality(EqualityIndex::new());
        let op = IndexOp::AddAtom {
            row: 1,
            column: 0,
            atom: "a".into(),
        };
        assert!(!index.accepts(&op));
        let err = index.apply(&op).unwrap_err();
        assert!(err.is_internal());

        let mut index = LookupIndex::Membership(MembershipIndex::new(1));
        let op = IndexOp::AddAtom {
            row: 1,
            column: 1,
            atom: "a".into(),
        };
        assert!(!index.accepts(&op));
        assert!(index.apply(&op).is_err());

        let op = IndexOp::AddAtom {
            row: 1,
            column: 0,
            atom: "a".into(),
        };
        assert!(index.accepts(&op));
        assert!(index.apply(&op).unwrap());
        assert!(!index.apply(&op).unwrap());
        assert_eq!(index.matches(&tuple(&["a"])), rows(&[1]));
    }

    #[test]
    fn test_inverse_undoes_op() {
        let mut index = LookupIndex::Equality(EqualityIndex::new());
        let add = IndexOp::AddTuple {
            row: 4,
            tuple: tuple(&["foo"]),
        };
        index.apply(&add).unwrap();
        assert!(index.apply(&add.inverse()).unwrap());
        assert!(index.matches(&tuple(&["foo"])).is_empty());
        assert_eq!(add.inverse().inverse(), add);

        let remove = IndexOp::RemoveAtom {
            row: 2,
            column: 0,
            atom: "a".into(),
        };
        assert!(matches!(remove.inverse(), IndexOp::AddAtom { row: 2, column: 0, .. }));
    }
}
