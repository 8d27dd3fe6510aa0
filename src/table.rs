/// LiveSummary Source Table
///
/// A SourceTable holds the rows that summaries group. Rows are addressed by
/// id; ids are assigned in increasing order and never reused, even after a
/// row is deleted. Every mutation is validated against the schema before
/// anything changes and is recorded in the table's changeset.
///
/// The table also owns the lookup index of every summary built over it,
/// keyed by summary id.
///
/// # Examples
///
/// ```
/// use livesummary::{ColumnDecl, Schema, SourceTable, Value};
/// use std::collections::HashMap;
///
/// let schema = Schema::new(vec![
///     ColumnDecl::scalar("name"),
///     ColumnDecl::multi_valued("tags"),
/// ]);
/// let mut table = SourceTable::new("items".to_string(), schema);
///
/// let mut row = HashMap::new();
/// row.insert("name".to_string(), Value::scalar("widget"));
/// row.insert("tags".to_string(), Value::labels(["red", "small"]));
/// let id = table.append_row(row).unwrap();
///
/// assert_eq!(id, 1);
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.get_value(id, "name").unwrap(), &Value::scalar("widget"));
/// ```

use crate::changeset::TableChange;
use crate::column::{ColumnDecl, ColumnKind};
use crate::error::{Result, SummaryError};
use crate::index::LookupIndex;
use crate::summary::SummaryId;
use crate::value::{Atom, Value};
use std::collections::{BTreeMap, HashMap};

/// Source row identifier. Assigned from 1 upwards, never reused.
pub type RowId = u64;

/// Ordered column declarations of a table.
///
/// # Examples
///
/// ```
/// use livesummary::{ColumnDecl, ColumnKind, Schema};
///
/// let schema = Schema::new(vec![
///     ColumnDecl::scalar("other"),
///     ColumnDecl::multi_valued("choices"),
/// ]);
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.get_column_index("choices"), Some(1));
/// assert_eq!(schema.get_column_kind("choices"), Some(ColumnKind::MultiValued));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDecl>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDecl>) -> Self {
        Schema { columns }
    }

    /// Returns the number of columns in the schema.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDecl] {
        &self.columns
    }

    /// Returns a list of all column names.
    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns the index of a column by name, or None if not found.
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_kind(&self, name: &str) -> Option<ColumnKind> {
        self.get_column(name).map(|c| c.kind)
    }

    fn require_index(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| SummaryError::ColumnNotFound(name.to_string()))
    }
}

/// Root table owning the source rows and the summary index registry.
#[derive(Debug, Clone)]
pub struct SourceTable {
    name: String,
    schema: Schema,
    /// Row values ordered by schema position
    rows: BTreeMap<RowId, Vec<Value>>,
    next_row_id: RowId,
    /// Changes not yet propagated to summaries
    pending: Vec<TableChange>,
    /// Lookup index of each summary grouping this table
    indexes: HashMap<SummaryId, LookupIndex>,
}

impl SourceTable {
    pub fn new(name: String, schema: Schema) -> Self {
        SourceTable {
            name,
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
            pending: Vec::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The id the next appended row will receive
    pub fn next_row_id(&self) -> RowId {
        self.next_row_id
    }

    pub fn contains_row(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Live row ids in ascending order
    pub fn row_ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.keys().copied()
    }

    /// Rows in ascending id order, values ordered by schema position
    pub fn iter_rows(&self) -> impl Iterator<Item = (RowId, &[Value])> + '_ {
        self.rows.iter().map(|(id, values)| (*id, values.as_slice()))
    }

    pub fn row_values(&self, id: RowId) -> Result<&[Value]> {
        self.rows
            .get(&id)
            .map(|values| values.as_slice())
            .ok_or(SummaryError::RowNotFound(id))
    }

    pub fn get_value(&self, id: RowId, column: &str) -> Result<&Value> {
        let col_idx = self.schema.require_index(column)?;
        Ok(&self.row_values(id)?[col_idx])
    }

    pub fn get_row(&self, id: RowId) -> Result<HashMap<String, Value>> {
        let values = self.row_values(id)?;
        Ok(self
            .schema
            .columns()
            .iter()
            .zip(values)
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect())
    }

    /// Validates a full row and lays it out in schema order
    fn build_row(&self, mut row: HashMap<String, Value>) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.schema.len());
        for column in self.schema.columns() {
            let value = row
                .remove(&column.name)
                .ok_or_else(|| SummaryError::MissingValue(column.name.clone()))?;
            value.check_kind(&column.name, column.kind)?;
            values.push(value);
        }
        if let Some(unknown) = row.into_keys().next() {
            return Err(SummaryError::ColumnNotFound(unknown));
        }
        Ok(values)
    }

    /// Append a row under the next free id.
    pub fn append_row(&mut self, row: HashMap<String, Value>) -> Result<RowId> {
        let id = self.next_row_id;
        self.insert_row_with_id(id, row)
    }

    /// Insert a row under an explicit id. The id must not have been handed
    /// out before, so it has to be at least `next_row_id()`, and it must
    /// leave room for the id after it.
    pub fn insert_row_with_id(&mut self, id: RowId, row: HashMap<String, Value>) -> Result<RowId> {
        if id < self.next_row_id {
            return Err(SummaryError::RowIdReused {
                id,
                next: self.next_row_id,
            });
        }
        let next_row_id = id.checked_add(1).ok_or(SummaryError::RowIdExhausted(id))?;
        let values = self.build_row(row)?;

        self.rows.insert(id, values.clone());
        self.next_row_id = next_row_id;

        self.pending.push(TableChange::RowInserted { id, values });
        Ok(id)
    }

    /// Update some cells of a row. Columns not named keep their value.
    /// Returns false if nothing actually changed.
    pub fn update_row(&mut self, id: RowId, updates: HashMap<String, Value>) -> Result<bool> {
        let old_values = self.row_values(id)?.to_vec();
        let mut new_values = old_values.clone();

        for (column, value) in updates {
            let col_idx = self.schema.require_index(&column)?;
            value.check_kind(&column, self.schema.columns()[col_idx].kind)?;
            new_values[col_idx] = value;
        }

        Ok(self.replace_row(id, old_values, new_values))
    }

    pub fn set_value(&mut self, id: RowId, column: &str, value: Value) -> Result<bool> {
        self.update_row(id, HashMap::from([(column.to_string(), value)]))
    }

    fn replace_row(&mut self, id: RowId, old_values: Vec<Value>, new_values: Vec<Value>) -> bool {
        if old_values == new_values {
            return false;
        }
        self.rows.insert(id, new_values.clone());
        self.pending.push(TableChange::RowUpdated {
            id,
            old_values,
            new_values,
        });
        true
    }

    pub fn delete_row(&mut self, id: RowId) -> Result<HashMap<String, Value>> {
        let result = self.get_row(id)?;
        let values = self.rows.remove(&id).ok_or(SummaryError::RowNotFound(id))?;

        self.pending.push(TableChange::RowDeleted { id, values });
        Ok(result)
    }

    /// Rename labels across every row of a column, all renames applied at
    /// once (so `a -> b, b -> a` swaps). Scalar cells are replaced when they
    /// equal an old label; label sets keep the renamed label's position.
    ///
    /// Each changed row is recorded as its own update, in ascending row id
    /// order. Returns the number of rows changed.
    pub fn rename_labels(&mut self, column: &str, renames: &[(Atom, Atom)]) -> Result<usize> {
        let col_idx = self.schema.require_index(column)?;

        let mut mapping: HashMap<&Atom, &Atom> = HashMap::with_capacity(renames.len());
        for (from, to) in renames {
            mapping.entry(from).or_insert(to);
        }
        let rename = |atom: &Atom| mapping.get(atom).map(|to| (*to).clone());

        let mut updates = Vec::new();
        for (id, values) in &self.rows {
            let renamed = match &values[col_idx] {
                Value::Scalar(atom) => rename(atom).map(Value::Scalar),
                Value::Set(set) if set.iter().any(|atom| mapping.contains_key(atom)) => {
                    Some(Value::Set(set.map_labels(rename)))
                }
                Value::Set(_) => None,
            };
            if let Some(value) = renamed {
                let mut new_values = values.clone();
                new_values[col_idx] = value;
                updates.push((*id, values.clone(), new_values));
            }
        }

        let mut changed = 0;
        for (id, old_values, new_values) in updates {
            if self.replace_row(id, old_values, new_values) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Rename a column. Row values are untouched.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        let col_idx = self.schema.require_index(old)?;
        if old != new && self.schema.get_column_index(new).is_some() {
            return Err(SummaryError::ColumnExists(new.to_string()));
        }
        self.schema.columns[col_idx].name = new.to_string();
        Ok(())
    }

    /// Change a column's kind, converting every stored value. Fails without
    /// changing anything if any value cannot be converted.
    ///
    /// This is a schema change: no row events are recorded, and summaries
    /// grouping by the column must be recreated by the caller.
    pub fn change_column_kind(&mut self, column: &str, kind: ColumnKind) -> Result<()> {
        let col_idx = self.schema.require_index(column)?;

        let converted = self
            .rows
            .iter()
            .map(|(id, values)| Ok((*id, values[col_idx].convert(column, kind)?)))
            .collect::<Result<Vec<_>>>()?;

        for (id, value) in converted {
            if let Some(values) = self.rows.get_mut(&id) {
                values[col_idx] = value;
            }
        }
        self.schema.columns[col_idx].kind = kind;
        Ok(())
    }

    // === Pending changes ===

    /// Takes every change recorded since the last drain, oldest first
    pub fn drain_changes(&mut self) -> Vec<TableChange> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    // === Undo support ===

    /// Put a row back the way it was before `change`. Nothing is recorded.
    pub(crate) fn revert(&mut self, change: TableChange) {
        match change {
            TableChange::RowInserted { id, .. } => {
                self.rows.remove(&id);
            }
            TableChange::RowDeleted { id, values } => {
                self.rows.insert(id, values);
            }
            TableChange::RowUpdated { id, old_values, .. } => {
                self.rows.insert(id, old_values);
            }
        }
    }

    pub(crate) fn rewind_row_ids(&mut self, next_row_id: RowId) {
        self.next_row_id = next_row_id;
    }

    /// Current kind of a column and its value in every row
    pub(crate) fn column_values(&self, column: &str) -> Result<(ColumnKind, Vec<(RowId, Value)>)> {
        let col_idx = self.schema.require_index(column)?;
        let values = self
            .rows
            .iter()
            .map(|(id, values)| (*id, values[col_idx].clone()))
            .collect();
        Ok((self.schema.columns[col_idx].kind, values))
    }

    /// Reinstate values captured by `column_values`. Nothing is recorded.
    pub(crate) fn restore_column(&mut self, column: &str, kind: ColumnKind, values: Vec<(RowId, Value)>) -> Result<()> {
        let col_idx = self.schema.require_index(column)?;
        for (id, value) in values {
            if let Some(row) = self.rows.get_mut(&id) {
                row[col_idx] = value;
            }
        }
        self.schema.columns[col_idx].kind = kind;
        Ok(())
    }

    // === Summary index registry ===

    /// Returns the index previously registered for the summary, if any
    pub fn register_index(&mut self, summary: SummaryId, index: LookupIndex) -> Option<LookupIndex> {
        self.indexes.insert(summary, index)
    }

    pub fn index(&self, summary: SummaryId) -> Option<&LookupIndex> {
        self.indexes.get(&summary)
    }

    pub fn index_mut(&mut self, summary: SummaryId) -> Option<&mut LookupIndex> {
        self.indexes.get_mut(&summary)
    }

    pub fn remove_index(&mut self, summary: SummaryId) -> Option<LookupIndex> {
        self.indexes.remove(&summary)
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }
}
