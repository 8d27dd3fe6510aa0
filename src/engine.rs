/// Summary Engine
///
/// The engine owns one source table and every summary built over it. Source
/// actions go through `apply` or `apply_all`; each action mutates the source
/// table, then every resulting change is pushed through each summary in
/// ascending summary id before the next change is looked at.
///
/// # Transactions
///
/// Every public mutating call is one transaction. While it runs, an undo
/// journal collects the drained source changes, the inverse of every index op
/// and the schema steps taken. If any step fails, including the optional
/// invariant check at the end, the journal is replayed backwards and the
/// engine is left exactly as it was. Nothing is copied up front, so a
/// transaction costs what its changes cost.
///
/// # Examples
///
/// ```
/// use livesummary::{ColumnDecl, GroupingSpec, KeyTuple, Schema, SourceAction, SourceTable, SummaryEngine, Value};
/// use std::collections::HashMap;
///
/// let schema = Schema::new(vec![ColumnDecl::multi_valued("tags")]);
/// let mut engine = SummaryEngine::new(SourceTable::new("Items".to_string(), schema));
/// let summary = engine.create_summary(GroupingSpec::new(["tags"])).unwrap();
///
/// let mut row = HashMap::new();
/// row.insert("tags".to_string(), Value::labels(["red", "blue"]));
/// engine.apply(SourceAction::insert(row)).unwrap();
///
/// let table = engine.summary(summary).unwrap();
/// assert_eq!(table.len(), 2);
/// assert_eq!(table.lookup(&KeyTuple::from_iter(["blue"])).unwrap().count(), 1);
/// ```

use crate::column::ColumnKind;
use crate::config::{EngineConfig, GroupingSpec};
use crate::changeset::TableChange;
use crate::error::{Result, SummaryError};
use crate::index::LookupIndex;
use crate::journal::{Journal, SchemaUndo};
use crate::summary::{ReconcileReport, SummaryId, SummaryTable};
use crate::table::{RowId, SourceTable};
use crate::value::{Atom, Value};
use log::{debug, error, warn};
use std::collections::{BTreeMap, HashMap};

/// A mutation submitted against the source table.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceAction {
    /// Insert a full row, under the next free id or an explicit one
    Insert {
        id: Option<RowId>,
        values: HashMap<String, Value>,
    },
    /// Update the named columns of a row
    Update {
        id: RowId,
        values: HashMap<String, Value>,
    },
    Delete {
        id: RowId,
    },
    /// Rename labels across a whole column, all pairs applied at once
    RenameLabels {
        column: String,
        renames: Vec<(Atom, Atom)>,
    },
}

impl SourceAction {
    pub fn insert(values: HashMap<String, Value>) -> Self {
        SourceAction::Insert { id: None, values }
    }

    pub fn insert_with_id(id: RowId, values: HashMap<String, Value>) -> Self {
        SourceAction::Insert { id: Some(id), values }
    }

    pub fn update(id: RowId, values: HashMap<String, Value>) -> Self {
        SourceAction::Update { id, values }
    }

    pub fn delete(id: RowId) -> Self {
        SourceAction::Delete { id }
    }

    /// Rename a single label
    pub fn rename_label(column: impl Into<String>, from: impl Into<Atom>, to: impl Into<Atom>) -> Self {
        SourceAction::RenameLabels {
            column: column.into(),
            renames: vec![(from.into(), to.into())],
        }
    }

    pub fn rename_labels<I, A, B>(column: impl Into<String>, renames: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<Atom>,
        B: Into<Atom>,
    {
        SourceAction::RenameLabels {
            column: column.into(),
            renames: renames
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionReport {
    /// Ids of inserted source rows, in submission order
    pub inserted: Vec<RowId>,
    /// Number of source row changes propagated
    pub changes: usize,
    /// Summary rows created or changed, per summary
    pub summaries: BTreeMap<SummaryId, ReconcileReport>,
}

impl TransactionReport {
    /// Summary rows created in one summary during the transaction
    pub fn created(&self, summary: SummaryId) -> &[RowId] {
        self.summaries
            .get(&summary)
            .map(|report| report.created.as_slice())
            .unwrap_or(&[])
    }
}

pub struct SummaryEngine {
    config: EngineConfig,
    source: SourceTable,
    summaries: BTreeMap<SummaryId, SummaryTable>,
    next_summary_id: SummaryId,
    /// Undo journal of the running transaction
    journal: Journal,
}

impl SummaryEngine {
    pub fn new(source: SourceTable) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    pub fn with_config(source: SourceTable, config: EngineConfig) -> Self {
        SummaryEngine {
            config,
            source,
            summaries: BTreeMap::new(),
            next_summary_id: 1,
            journal: Journal::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &SourceTable {
        &self.source
    }

    pub fn summary(&self, id: SummaryId) -> Result<&SummaryTable> {
        self.summaries.get(&id).ok_or(SummaryError::SummaryNotFound(id))
    }

    pub fn summary_by_name(&self, name: &str) -> Option<&SummaryTable> {
        self.summaries.values().find(|summary| summary.name() == name)
    }

    /// Summaries in id order
    pub fn summaries(&self) -> impl Iterator<Item = &SummaryTable> + '_ {
        self.summaries.values()
    }

    // === Transactions ===

    fn transaction<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.journal = Journal::begin(self.source.next_row_id(), self.next_summary_id);
        let result = op(&mut *self).and_then(|value| {
            self.check_invariants()?;
            Ok(value)
        });
        let journal = std::mem::take(&mut self.journal);
        if let Err(err) = &result {
            warn!("transaction on '{}' rolled back: {}", self.source.name(), err);
            self.rollback(journal);
        }
        result
    }

    fn rollback(&mut self, journal: Journal) {
        self.next_summary_id = journal.next_summary_id();
        for id in journal.rollback(&mut self.source, &mut self.summaries) {
            if let Err(err) = self.rebuild_summary(id) {
                error!("summary {} could not be rebuilt after rollback: {}", id, err);
            }
        }
    }

    /// Checks what the running transaction touched. Summaries it built from
    /// scratch get the full check.
    fn check_invariants(&self) -> Result<()> {
        if !self.config.check_invariants {
            return Ok(());
        }
        if self.source.has_pending_changes() {
            return Err(SummaryError::stale("source changes were left unpropagated"));
        }

        let sources = self.journal.touched_rows();
        for (id, undo) in self.journal.summary_undos() {
            if undo.is_empty() && sources.is_empty() {
                continue;
            }
            self.summary(id)?
                .verify_touched(undo, &sources, &self.source, self.index_for(id)?)?;
        }
        for id in self.journal.rebuilt() {
            if let Some(summary) = self.summaries.get(&id) {
                summary.verify(&self.source, self.index_for(id)?)?;
            }
        }
        Ok(())
    }

    fn index_for(&self, id: SummaryId) -> Result<&LookupIndex> {
        self.source
            .index(id)
            .ok_or_else(|| SummaryError::stale(format!("summary {}: no index registered", id)))
    }

    /// Verify every summary against the source table and its index.
    pub fn verify(&self) -> Result<()> {
        for (id, summary) in &self.summaries {
            summary.verify(&self.source, self.index_for(*id)?)?;
        }
        Ok(())
    }

    /// Push pending source changes through every summary. The drained
    /// changes go to the journal whether or not propagation succeeds.
    fn propagate(&mut self, report: &mut TransactionReport) -> Result<()> {
        let changes = self.source.drain_changes();
        report.changes += changes.len();
        let result = self.propagate_changes(&changes, report);
        self.journal.record_rows(changes);
        result
    }

    /// One change at a time, in ascending summary id order.
    fn propagate_changes(&mut self, changes: &[TableChange], report: &mut TransactionReport) -> Result<()> {
        for change in changes {
            for (id, summary) in self.summaries.iter_mut() {
                let index = self
                    .source
                    .index_mut(*id)
                    .ok_or_else(|| SummaryError::stale(format!("summary {}: no index registered", id)))?;
                let undo = self.journal.summary_undo(*id, summary);
                let reconciled = summary.apply_change(change, index, undo)?;
                if !reconciled.is_empty() {
                    report.summaries.entry(*id).or_default().merge(reconciled);
                }
            }
        }
        Ok(())
    }

    fn apply_action(&mut self, action: SourceAction, report: &mut TransactionReport) -> Result<()> {
        match action {
            SourceAction::Insert { id, values } => {
                let id = match id {
                    Some(id) => self.source.insert_row_with_id(id, values)?,
                    None => self.source.append_row(values)?,
                };
                report.inserted.push(id);
            }
            SourceAction::Update { id, values } => {
                self.source.update_row(id, values)?;
            }
            SourceAction::Delete { id } => {
                self.source.delete_row(id)?;
            }
            SourceAction::RenameLabels { column, renames } => {
                let changed = self.source.rename_labels(&column, &renames)?;
                debug!("renamed {} label(s) in '{}' across {} row(s)", renames.len(), column, changed);
            }
        }
        self.propagate(report)
    }

    // === Source actions ===

    pub fn apply(&mut self, action: SourceAction) -> Result<TransactionReport> {
        self.apply_all(vec![action])
    }

    /// Apply actions in order as a single transaction.
    pub fn apply_all<I>(&mut self, actions: I) -> Result<TransactionReport>
    where
        I: IntoIterator<Item = SourceAction>,
    {
        let report = self.transaction(|engine| {
            let mut report = TransactionReport::default();
            for action in actions {
                engine.apply_action(action, &mut report)?;
            }
            Ok(report)
        })?;
        debug!(
            "committed {} change(s) on '{}' touching {} summary(ies)",
            report.changes,
            self.source.name(),
            report.summaries.len()
        );
        Ok(report)
    }

    pub fn insert_row(&mut self, values: HashMap<String, Value>) -> Result<RowId> {
        let report = self.apply(SourceAction::insert(values))?;
        report
            .inserted
            .first()
            .copied()
            .ok_or_else(|| SummaryError::stale("insert reported no row id"))
    }

    pub fn update_row(&mut self, id: RowId, values: HashMap<String, Value>) -> Result<TransactionReport> {
        self.apply(SourceAction::update(id, values))
    }

    pub fn delete_row(&mut self, id: RowId) -> Result<TransactionReport> {
        self.apply(SourceAction::delete(id))
    }

    pub fn rename_labels(&mut self, column: &str, renames: Vec<(Atom, Atom)>) -> Result<TransactionReport> {
        self.apply(SourceAction::RenameLabels {
            column: column.to_string(),
            renames,
        })
    }

    /// Apply an update observed elsewhere, given its pre-image.
    ///
    /// Every column in `old_values` must match the stored row, otherwise the
    /// caller's view of the row is stale and nothing is applied.
    pub fn apply_update_with_pre_image(
        &mut self,
        id: RowId,
        old_values: HashMap<String, Value>,
        new_values: HashMap<String, Value>,
    ) -> Result<TransactionReport> {
        self.transaction(|engine| {
            for (column, expected) in &old_values {
                let stored = engine.source.get_value(id, column)?;
                if stored != expected {
                    return Err(SummaryError::stale(format!(
                        "row {} column '{}' holds {:?}, update expected {:?}",
                        id, column, stored, expected
                    )));
                }
            }
            let mut report = TransactionReport::default();
            engine.apply_action(SourceAction::update(id, new_values), &mut report)?;
            Ok(report)
        })
    }

    // === Schema operations ===

    fn next_summary_name(&self) -> String {
        let base = format!("{}_{}", self.config.summary_name_prefix, self.source.name());
        if self.summary_by_name(&base).is_none() {
            return base;
        }
        let mut n = 2;
        loop {
            let name = format!("{}{}", base, n);
            if self.summary_by_name(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }

    fn populated(&self, id: SummaryId, name: String, spec: GroupingSpec) -> Result<(SummaryTable, LookupIndex)> {
        let (mut summary, mut index) = SummaryTable::new(id, name, &self.source, spec)?;
        let report = summary.populate(&self.source, &mut index)?;
        debug!(
            "built summary {} '{}' ({} mode) with {} row(s)",
            id,
            summary.name(),
            if summary.is_simple() { "simple" } else { "complex" },
            report.created.len()
        );
        Ok((summary, index))
    }

    /// Build a summary from scratch, register its index and store it under
    /// `id`, journaling whatever it replaces.
    fn build_summary(&mut self, id: SummaryId, name: String, spec: GroupingSpec) -> Result<()> {
        let (summary, index) = self.populated(id, name, spec)?;
        let previous = self.summaries.insert(id, summary);
        let previous_index = self.source.register_index(id, index);
        self.journal.record_schema(SchemaUndo::SummaryBuilt {
            id,
            previous: previous.zip(previous_index),
        });
        Ok(())
    }

    /// Rebuild a summary in place from the current source rows. Not journaled.
    fn rebuild_summary(&mut self, id: SummaryId) -> Result<()> {
        let summary = self.summary(id)?;
        let (name, spec) = (summary.name().to_string(), summary.spec().clone());
        warn!("rebuilding summary {} '{}' from the source table", id, name);
        let (summary, index) = self.populated(id, name, spec)?;
        self.source.register_index(id, index);
        self.summaries.insert(id, summary);
        Ok(())
    }

    /// Create a summary grouped by `spec` and populate it from the source.
    pub fn create_summary(&mut self, spec: GroupingSpec) -> Result<SummaryId> {
        self.transaction(|engine| {
            let id = engine.next_summary_id;
            let name = engine.next_summary_name();
            engine.build_summary(id, name, spec)?;
            engine.next_summary_id += 1;
            Ok(id)
        })
    }

    /// Replace a summary's grouping. The summary keeps its id and name; its
    /// rows and index are rebuilt and row ids restart at 1.
    pub fn regroup(&mut self, id: SummaryId, spec: GroupingSpec) -> Result<()> {
        self.transaction(|engine| {
            let name = engine.summary(id)?.name().to_string();
            engine.build_summary(id, name, spec)
        })
    }

    /// Drop a summary and tear down its index.
    pub fn drop_summary(&mut self, id: SummaryId) -> Result<SummaryTable> {
        let summary = self.summaries.remove(&id).ok_or(SummaryError::SummaryNotFound(id))?;
        self.source.remove_index(id);
        debug!("dropped summary {} '{}'", id, summary.name());
        Ok(summary)
    }

    /// Rename a source column. Summary grouping columns follow the rename.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        self.transaction(|engine| {
            engine.source.rename_column(old, new)?;
            engine.journal.record_schema(SchemaUndo::ColumnRenamed {
                old: old.to_string(),
                new: new.to_string(),
            });
            for summary in engine.summaries.values_mut() {
                summary.rename_source_column(old, new);
            }
            Ok(())
        })
    }

    /// Change a source column's kind, converting its values, and recreate
    /// every summary grouping by it. Returns the recreated summary ids.
    pub fn change_column_kind(&mut self, column: &str, kind: ColumnKind) -> Result<Vec<SummaryId>> {
        self.transaction(|engine| {
            let (previous_kind, values) = engine.source.column_values(column)?;
            engine.source.change_column_kind(column, kind)?;
            engine.journal.record_schema(SchemaUndo::ColumnConverted {
                column: column.to_string(),
                kind: previous_kind,
                values,
            });

            let dependent: Vec<(SummaryId, String, GroupingSpec)> = engine
                .summaries
                .values()
                .filter_map(|summary| {
                    let position = summary.key().grouping_position(column)?;
                    let mut spec = summary.spec().clone();
                    if let Some(role) = spec.roles.as_mut().and_then(|roles| roles.get_mut(position)) {
                        *role = kind;
                    }
                    Some((summary.id(), summary.name().to_string(), spec))
                })
                .collect();

            for (id, name, spec) in &dependent {
                engine.build_summary(*id, name.clone(), spec.clone())?;
            }
            Ok(dependent.into_iter().map(|(id, _, _)| id).collect())
        })
    }
}
