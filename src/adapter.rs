/// Source Change Adapter
///
/// Turns one `TableChange` into an `IndexPlan`: the index operations that
/// bring a summary's lookup index in line with the change, plus the key
/// tuples whose summary rows must be reconciled afterwards.
///
/// # Design
///
/// The adapter never touches summary rows and never assumes a tuple already
/// has one. Planning is pure; `apply` validates the whole plan against the
/// index before mutating it, so a rejected plan leaves the index unchanged.

use crate::changeset::TableChange;
use crate::error::{Result, SummaryError};
use crate::index::{IndexOp, LookupIndex};
use crate::key::{GroupingKey, KeyTuple};
use crate::table::RowId;
use crate::value::{Atom, Value};
use std::collections::HashSet;

/// Index updates for one change, and the tuples they affect in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    pub ops: Vec<IndexOp>,
    /// Distinct tuples to reconcile, in the order new rows should be created
    pub affected: Vec<KeyTuple>,
}

impl IndexPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.affected.is_empty()
    }

    fn extend_affected<'a>(&mut self, tuples: impl IntoIterator<Item = &'a KeyTuple>) {
        let fresh: Vec<KeyTuple> = {
            let mut seen: HashSet<&KeyTuple> = self.affected.iter().collect();
            tuples.into_iter().filter(|t| seen.insert(*t)).cloned().collect()
        };
        self.affected.extend(fresh);
    }
}

/// Plans index maintenance for one summary's grouping key.
pub struct SourceChangeAdapter<'a> {
    key: &'a GroupingKey,
    simple: bool,
}

impl<'a> SourceChangeAdapter<'a> {
    pub fn new(key: &'a GroupingKey) -> Self {
        SourceChangeAdapter {
            key,
            simple: key.is_simple(),
        }
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub fn plan(&self, change: &TableChange) -> Result<IndexPlan> {
        match change {
            TableChange::RowInserted { id, values } => self.plan_membership_change(*id, values, true),
            TableChange::RowDeleted { id, values } => self.plan_membership_change(*id, values, false),
            TableChange::RowUpdated {
                id,
                old_values,
                new_values,
            } => {
                let touched = self
                    .key
                    .positions()
                    .iter()
                    .any(|&position| change.touches(position));
                if !touched {
                    return Ok(IndexPlan::default());
                }
                self.plan_update(*id, old_values, new_values)
            }
        }
    }

    /// Insert (`adding`) or delete of a whole row
    fn plan_membership_change(&self, row: RowId, values: &[Value], adding: bool) -> Result<IndexPlan> {
        let tuples = self.key.expand(values)?;
        let mut plan = IndexPlan::default();

        if self.simple {
            plan.ops = tuples
                .iter()
                .map(|tuple| tuple_op(row, tuple.clone(), adding))
                .collect();
        } else {
            for (column, atoms) in self.key.components(values)?.into_iter().enumerate() {
                plan.ops
                    .extend(atoms.iter().map(|atom| atom_op(row, column, atom.clone(), adding)));
            }
        }

        plan.extend_affected(&tuples);
        Ok(plan)
    }

    fn plan_update(&self, row: RowId, old_values: &[Value], new_values: &[Value]) -> Result<IndexPlan> {
        let old_tuples = self.key.expand(old_values)?;
        let new_tuples = self.key.expand(new_values)?;
        let mut plan = IndexPlan::default();

        if self.simple {
            for tuple in old_tuples.iter().filter(|t| !new_tuples.contains(*t)) {
                plan.ops.push(tuple_op(row, tuple.clone(), false));
            }
            for tuple in new_tuples.iter().filter(|t| !old_tuples.contains(*t)) {
                plan.ops.push(tuple_op(row, tuple.clone(), true));
            }
        } else {
            let old_components = self.key.components(old_values)?;
            let new_components = self.key.components(new_values)?;
            for (column, (old, new)) in old_components.iter().zip(&new_components).enumerate() {
                for atom in old.iter().filter(|a| !new.contains(*a)) {
                    plan.ops.push(atom_op(row, column, atom.clone(), false));
                }
                for atom in new.iter().filter(|a| !old.contains(*a)) {
                    plan.ops.push(atom_op(row, column, atom.clone(), true));
                }
            }
        }

        plan.extend_affected(&old_tuples);
        plan.extend_affected(&new_tuples);
        Ok(plan)
    }

    /// Checks every tuple and op in the plan, then applies the ops in order.
    ///
    /// Returns the inverse of each op that changed the index, in the order
    /// applied. Replaying them newest first restores the index.
    pub fn apply(&self, plan: &IndexPlan, index: &mut LookupIndex) -> Result<Vec<IndexOp>> {
        if index.is_simple() != self.simple {
            return Err(SummaryError::stale(
                "index variant does not match the grouping key's mode",
            ));
        }

        let width = self.key.width();
        for tuple in plan.ops.iter().filter_map(op_tuple).chain(&plan.affected) {
            if tuple.len() != width {
                return Err(SummaryError::stale(format!(
                    "tuple {} has {} components, grouping key has {}",
                    tuple,
                    tuple.len(),
                    width
                )));
            }
        }
        if let Some(op) = plan.ops.iter().find(|op| !index.accepts(op)) {
            return Err(SummaryError::stale(format!("{:?} rejected by index", op)));
        }

        let mut undo = Vec::with_capacity(plan.ops.len());
        for op in &plan.ops {
            if index.apply(op)? {
                undo.push(op.inverse());
            }
        }
        Ok(undo)
    }
}

fn tuple_op(row: RowId, tuple: KeyTuple, adding: bool) -> IndexOp {
    if adding {
        IndexOp::AddTuple { row, tuple }
    } else {
        IndexOp::RemoveTuple { row, tuple }
    }
}

fn atom_op(row: RowId, column: usize, atom: Atom, adding: bool) -> IndexOp {
    if adding {
        IndexOp::AddAtom { row, column, atom }
    } else {
        IndexOp::RemoveAtom { row, column, atom }
    }
}

fn op_tuple(op: &IndexOp) -> Option<&KeyTuple> {
    match op {
        IndexOp::AddTuple { tuple, .. } | IndexOp::RemoveTuple { tuple, .. } => Some(tuple),
        IndexOp::AddAtom { .. } | IndexOp::RemoveAtom { .. } => None,
    }
}
