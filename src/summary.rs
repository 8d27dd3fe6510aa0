/// LiveSummary Derived Table Maintainer
///
/// A SummaryTable holds one row per distinct key tuple observed in its
/// source table. Each row carries the live set of source rows matching its
/// tuple (`group`) and the size of that set (`count`).
///
/// # Design
///
/// Rows are append-only. A tuple that loses every matching source row keeps
/// its summary row with an empty group and a count of 0, so row ids stay
/// stable for consumers. Row ids start at 1 and follow the order in which
/// tuples are first seen.
///
/// The lookup index is not owned here; it lives in the source table's
/// registry and is passed in by the engine.

use crate::adapter::SourceChangeAdapter;
use crate::changeset::TableChange;
use crate::column::{ColumnDecl, ColumnKind};
use crate::config::GroupingSpec;
use crate::error::{Result, SummaryError};
use crate::index::{IndexOp, LookupIndex};
use crate::key::{GroupingKey, KeyTuple};
use crate::table::{RowId, SourceTable};
use log::trace;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub type SummaryId = u64;

/// Name of the computed column listing matching source rows
pub const GROUP_COLUMN: &str = "group";
/// Name of the computed column holding the size of `group`
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub id: RowId,
    pub grouping_values: KeyTuple,
    pub group: BTreeSet<RowId>,
}

impl SummaryRow {
    pub fn count(&self) -> usize {
        self.group.len()
    }
}

/// Summary rows touched by a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows created, in creation order
    pub created: Vec<RowId>,
    /// Existing rows whose group changed, excluding rows in `created`
    pub changed: Vec<RowId>,
    seen: HashSet<RowId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.changed.is_empty()
    }

    pub fn record_created(&mut self, id: RowId) {
        if self.seen.insert(id) {
            self.created.push(id);
        }
    }

    /// Ignored if the row is already listed as created or changed.
    pub fn record_changed(&mut self, id: RowId) {
        if self.seen.insert(id) {
            self.changed.push(id);
        }
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        for id in other.created {
            self.record_created(id);
        }
        for id in other.changed {
            self.record_changed(id);
        }
    }
}

/// What one summary needs to undo its share of a failed transaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct SummaryUndo {
    /// Row ids from here on were created during the transaction
    next_row_id: RowId,
    /// Inverse index ops, oldest first
    index_ops: Vec<IndexOp>,
    /// Tuples reconciled during the transaction, first touch order
    touched: Vec<KeyTuple>,
    seen: HashSet<KeyTuple>,
}

impl SummaryUndo {
    fn touch(&mut self, tuples: &[KeyTuple]) {
        for tuple in tuples {
            if self.seen.insert(tuple.clone()) {
                self.touched.push(tuple.clone());
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index_ops.is_empty() && self.touched.is_empty()
    }
}

/// Serializable read model of a summary table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummarySnapshot {
    pub id: SummaryId,
    pub name: String,
    pub source: String,
    pub simple: bool,
    pub columns: Vec<ColumnDecl>,
    pub rows: Vec<SummaryRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub id: RowId,
    pub grouping: KeyTuple,
    pub group: Vec<RowId>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct SummaryTable {
    id: SummaryId,
    name: String,
    source: String,
    spec: GroupingSpec,
    key: GroupingKey,
    simple: bool,
    key_index: HashMap<KeyTuple, RowId>,
    rows: BTreeMap<RowId, SummaryRow>,
    next_row_id: RowId,
}

impl SummaryTable {
    /// Builds an empty summary for `spec` over `source`, together with the
    /// lookup index its grouping key calls for.
    pub fn new(
        id: SummaryId,
        name: String,
        source: &SourceTable,
        spec: GroupingSpec,
    ) -> Result<(Self, LookupIndex)> {
        let key = GroupingKey::new(source.schema(), &spec)?;
        let index = LookupIndex::for_key(&key);
        let summary = SummaryTable {
            id,
            name,
            source: source.name().to_string(),
            spec,
            simple: key.is_simple(),
            key,
            key_index: HashMap::new(),
            rows: BTreeMap::new(),
            next_row_id: 1,
        };
        Ok((summary, index))
    }

    pub fn id(&self) -> SummaryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    pub fn spec(&self) -> &GroupingSpec {
        &self.spec
    }

    pub fn key(&self) -> &GroupingKey {
        &self.key
    }

    /// True when every grouping column is scalar and the summary is backed
    /// by an equality index.
    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Grouping columns followed by `group` and `count`
    pub fn columns(&self) -> Vec<ColumnDecl> {
        let mut columns = self.key.columns().to_vec();
        columns.push(ColumnDecl::new(GROUP_COLUMN, ColumnKind::MultiValued));
        columns.push(ColumnDecl::new(COUNT_COLUMN, ColumnKind::Scalar));
        columns
    }

    pub fn row(&self, id: RowId) -> Option<&SummaryRow> {
        self.rows.get(&id)
    }

    /// Rows in id order
    pub fn rows(&self) -> impl Iterator<Item = &SummaryRow> + '_ {
        self.rows.values()
    }

    /// The row for a tuple, if one has been created. Never creates a row.
    pub fn lookup(&self, tuple: &KeyTuple) -> Option<&SummaryRow> {
        self.key_index.get(tuple).and_then(|id| self.rows.get(id))
    }

    /// Fill the summary from every live source row, indexing rows in
    /// ascending id order. Tuples are created in that order too.
    pub fn populate(&mut self, source: &SourceTable, index: &mut LookupIndex) -> Result<ReconcileReport> {
        let adapter = SourceChangeAdapter::new(&self.key);
        let mut affected = Vec::new();
        for (id, values) in source.iter_rows() {
            let plan = adapter.plan(&TableChange::RowInserted {
                id,
                values: values.to_vec(),
            })?;
            adapter.apply(&plan, index)?;
            affected.extend(plan.affected);
        }

        self.reconcile(&affected, index)
    }

    /// Propagate source changes in order, reconciling after each one.
    ///
    /// If any change fails, the summary and the index are put back as they
    /// were before the first change.
    pub fn apply_changes(&mut self, changes: &[TableChange], index: &mut LookupIndex) -> Result<ReconcileReport> {
        let mut undo = self.begin_undo();
        let mut report = ReconcileReport::default();
        for change in changes {
            match self.apply_change(change, index, &mut undo) {
                Ok(reconciled) => report.merge(reconciled),
                Err(err) => {
                    self.rollback(undo, index)?;
                    return Err(err);
                }
            }
        }
        Ok(report)
    }

    pub(crate) fn begin_undo(&self) -> SummaryUndo {
        SummaryUndo {
            next_row_id: self.next_row_id,
            ..SummaryUndo::default()
        }
    }

    /// Propagate one change, recording in `undo` how to take it back.
    pub(crate) fn apply_change(
        &mut self,
        change: &TableChange,
        index: &mut LookupIndex,
        undo: &mut SummaryUndo,
    ) -> Result<ReconcileReport> {
        let adapter = SourceChangeAdapter::new(&self.key);
        let plan = adapter.plan(change)?;
        if plan.is_empty() {
            return Ok(ReconcileReport::default());
        }
        undo.index_ops.extend(adapter.apply(&plan, index)?);
        undo.touch(&plan.affected);
        self.reconcile(&plan.affected, index)
    }

    /// Take back everything recorded in `undo`. Index ops are reverted
    /// newest first, rows created since the undo began are dropped and the
    /// groups of touched rows are read back from the restored index.
    pub(crate) fn rollback(&mut self, undo: SummaryUndo, index: &mut LookupIndex) -> Result<()> {
        for op in undo.index_ops.iter().rev() {
            index.apply(op)?;
        }

        let created: Vec<RowId> = self.rows.range(undo.next_row_id..).map(|(id, _)| *id).collect();
        for id in created {
            if let Some(row) = self.rows.remove(&id) {
                self.key_index.remove(&row.grouping_values);
            }
        }
        self.next_row_id = undo.next_row_id;

        for tuple in &undo.touched {
            let Some(id) = self.key_index.get(tuple).copied() else {
                continue;
            };
            if let Some(row) = self.rows.get_mut(&id) {
                row.group = index.matches(tuple);
            }
        }
        Ok(())
    }

    /// Bring the rows for `affected` in line with the index.
    ///
    /// Unseen tuples get a new row (possibly with an empty group), in the
    /// order given. Seen tuples are recomputed in place.
    pub fn reconcile(&mut self, affected: &[KeyTuple], index: &LookupIndex) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for tuple in affected {
            if tuple.len() != self.key.width() {
                return Err(SummaryError::stale(format!(
                    "summary {}: tuple {} does not fit a {}-column key",
                    self.id,
                    tuple,
                    self.key.width()
                )));
            }

            let group = index.matches(tuple);
            match self.key_index.get(tuple).copied() {
                Some(row_id) => {
                    let row = self.rows.get_mut(&row_id).ok_or_else(|| {
                        SummaryError::stale(format!(
                            "summary {}: tuple {} points at missing row {}",
                            self.id, tuple, row_id
                        ))
                    })?;
                    if row.grouping_values != *tuple {
                        return Err(SummaryError::stale(format!(
                            "summary {}: row {} holds {} but is indexed under {}",
                            self.id, row_id, row.grouping_values, tuple
                        )));
                    }
                    if row.group != group {
                        trace!("summary {}: row {} {} now has {} rows", self.id, row_id, tuple, group.len());
                        row.group = group;
                        report.record_changed(row_id);
                    }
                }
                None => {
                    let row_id = self.next_row_id;
                    self.next_row_id += 1;
                    trace!("summary {}: created row {} for {} with {} rows", self.id, row_id, tuple, group.len());
                    self.key_index.insert(tuple.clone(), row_id);
                    self.rows.insert(
                        row_id,
                        SummaryRow {
                            id: row_id,
                            grouping_values: tuple.clone(),
                            group,
                        },
                    );
                    report.record_created(row_id);
                }
            }
        }

        Ok(report)
    }

    /// Check the summary and its index against the source table.
    ///
    /// Fails with `StaleTupleReference` if `key_index` and `rows` disagree, a
    /// group differs from what the index answers, a grouped row doesn't exist
    /// or doesn't expand to the row's tuple, or a live source row is missing
    /// from one of its tuples.
    pub fn verify(&self, source: &SourceTable, index: &LookupIndex) -> Result<()> {
        let fault = |detail: String| SummaryError::stale(format!("summary {}: {}", self.id, detail));

        if self.key_index.len() != self.rows.len() {
            return Err(fault(format!(
                "{} indexed tuples for {} rows",
                self.key_index.len(),
                self.rows.len()
            )));
        }

        for (row_id, row) in &self.rows {
            if self.key_index.get(&row.grouping_values) != Some(row_id) {
                return Err(fault(format!("row {} {} is not indexed", row_id, row.grouping_values)));
            }
            if index.matches(&row.grouping_values) != row.group {
                return Err(fault(format!("row {} {} is out of date", row_id, row.grouping_values)));
            }
            for member in &row.group {
                let values = source
                    .row_values(*member)
                    .map_err(|_| fault(format!("row {} groups missing source row {}", row_id, member)))?;
                if !self.key.expand(values)?.contains(&row.grouping_values) {
                    return Err(fault(format!(
                        "source row {} does not belong to {}",
                        member, row.grouping_values
                    )));
                }
            }
        }

        for (source_id, values) in source.iter_rows() {
            for tuple in self.key.expand(values)? {
                let grouped = self.lookup(&tuple).is_some_and(|row| row.group.contains(&source_id));
                if !grouped {
                    return Err(fault(format!("source row {} missing from {}", source_id, tuple)));
                }
            }
        }

        Ok(())
    }

    /// `verify` restricted to what one transaction touched: the rows of the
    /// reconciled tuples, and the source rows in `sources`.
    pub(crate) fn verify_touched(
        &self,
        undo: &SummaryUndo,
        sources: &BTreeSet<RowId>,
        source: &SourceTable,
        index: &LookupIndex,
    ) -> Result<()> {
        let fault = |detail: String| SummaryError::stale(format!("summary {}: {}", self.id, detail));

        for tuple in &undo.touched {
            let row = self
                .lookup(tuple)
                .ok_or_else(|| fault(format!("tuple {} has no row", tuple)))?;
            if row.grouping_values != *tuple {
                return Err(fault(format!("row {} holds {} but is indexed under {}", row.id, row.grouping_values, tuple)));
            }
            if index.matches(tuple) != row.group {
                return Err(fault(format!("row {} {} is out of date", row.id, tuple)));
            }
            for member in row.group.intersection(sources) {
                let values = source
                    .row_values(*member)
                    .map_err(|_| fault(format!("row {} groups missing source row {}", row.id, member)))?;
                if !self.key.expand(values)?.contains(tuple) {
                    return Err(fault(format!("source row {} does not belong to {}", member, tuple)));
                }
            }
        }

        for source_id in sources {
            let Ok(values) = source.row_values(*source_id) else {
                continue;
            };
            for tuple in self.key.expand(values)? {
                let grouped = self.lookup(&tuple).is_some_and(|row| row.group.contains(source_id));
                if !grouped {
                    return Err(fault(format!("source row {} missing from {}", source_id, tuple)));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn rename_source_column(&mut self, old: &str, new: &str) {
        self.key.rename_source_column(old, new);
        for column in &mut self.spec.columns {
            if column == old {
                *column = new.to_string();
            }
        }
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            id: self.id,
            name: self.name.clone(),
            source: self.source.clone(),
            simple: self.simple,
            columns: self.columns(),
            rows: self
                .rows
                .values()
                .map(|row| SummaryRecord {
                    id: row.id,
                    grouping: row.grouping_values.clone(),
                    group: row.group.iter().copied().collect(),
                    count: row.count(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}
