/// Grouping keys and key tuples.
///
/// A `GroupingKey` binds an ordered list of grouping columns to their
/// positions in the source schema. Expanding a source row through the key
/// yields every `KeyTuple` the row belongs to: exactly one when all grouping
/// columns are scalar, the Cartesian product of label sets otherwise.
///
/// # Examples
///
/// ```
/// use livesummary::{ColumnDecl, GroupingKey, KeyTuple, Schema, Value};
///
/// let schema = Schema::new(vec![
///     ColumnDecl::multi_valued("tag1"),
///     ColumnDecl::multi_valued("tag2"),
/// ]);
/// let key = GroupingKey::from_columns(&schema, &["tag1", "tag2"]).unwrap();
///
/// let row = vec![Value::labels(["a", "b"]), Value::labels(["c", "d"])];
/// let tuples = key.expand(&row).unwrap();
/// assert_eq!(tuples.len(), 4);
/// assert_eq!(tuples[1], KeyTuple::from_iter(["a", "d"]));
/// ```

use crate::column::{ColumnDecl, ColumnKind};
use crate::config::GroupingSpec;
use crate::error::{Result, SummaryError};
use crate::table::Schema;
use crate::value::{Atom, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One atom per grouping column, in grouping column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyTuple(Vec<Atom>);

impl KeyTuple {
    pub fn new(components: Vec<Atom>) -> Self {
        KeyTuple(components)
    }

    pub fn components(&self) -> &[Atom] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Atom> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<A: Into<Atom>> FromIterator<A> for KeyTuple {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        KeyTuple(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, atom) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", atom)?;
        }
        write!(f, ")")
    }
}

/// Ordered grouping columns bound to a source schema.
///
/// `columns` are the summary's grouping column declarations, always scalar.
/// `roles` keep the source kind of each column, which decides how a source
/// value is expanded.
#[derive(Debug, Clone)]
pub struct GroupingKey {
    columns: Vec<ColumnDecl>,
    roles: Vec<ColumnKind>,
    /// Position of each grouping column in the source schema
    positions: Vec<usize>,
}

impl GroupingKey {
    /// Binds a grouping spec to the source schema.
    ///
    /// Fails with `InvalidGroupingSpec` when a column doesn't exist, is named
    /// twice, or the spec declares a role the source column doesn't have.
    pub fn new(schema: &Schema, spec: &GroupingSpec) -> Result<Self> {
        if let Some(roles) = &spec.roles {
            if roles.len() != spec.columns.len() {
                return Err(SummaryError::InvalidGroupingSpec(format!(
                    "{} roles declared for {} grouping columns",
                    roles.len(),
                    spec.columns.len()
                )));
            }
        }

        let mut columns = Vec::with_capacity(spec.columns.len());
        let mut roles = Vec::with_capacity(spec.columns.len());
        let mut positions = Vec::with_capacity(spec.columns.len());

        for (i, name) in spec.columns.iter().enumerate() {
            let position = schema.get_column_index(name).ok_or_else(|| {
                SummaryError::InvalidGroupingSpec(format!(
                    "column '{}' does not exist on the source table",
                    name
                ))
            })?;
            if positions.contains(&position) {
                return Err(SummaryError::InvalidGroupingSpec(format!(
                    "column '{}' is grouped more than once",
                    name
                )));
            }

            let source = &schema.columns()[position];
            if let Some(role) = spec.roles.as_ref().map(|roles| roles[i]) {
                if role != source.kind {
                    return Err(SummaryError::InvalidGroupingSpec(format!(
                        "column '{}' is declared {} but the source column is {}",
                        name, role, source.kind
                    )));
                }
            }

            columns.push(ColumnDecl::grouped_from(source));
            roles.push(source.kind);
            positions.push(position);
        }

        Ok(GroupingKey {
            columns,
            roles,
            positions,
        })
    }

    /// Shorthand for a spec that names columns without declaring roles.
    pub fn from_columns(schema: &Schema, columns: &[&str]) -> Result<Self> {
        Self::new(schema, &GroupingSpec::new(columns.iter().copied()))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnDecl] {
        &self.columns
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Source kind of each grouping column
    pub fn roles(&self) -> &[ColumnKind] {
        &self.roles
    }

    /// True when every grouping column is scalar, so each row maps to exactly
    /// one tuple and an equality index suffices.
    pub fn is_simple(&self) -> bool {
        self.roles.iter().all(|role| *role == ColumnKind::Scalar)
    }

    /// Grouping position of the column mirroring `source_column`.
    pub fn grouping_position(&self, source_column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.source_column.as_deref() == Some(source_column))
    }

    /// True if a change at source schema position `position` can move rows
    /// between tuples.
    pub fn covers_position(&self, position: usize) -> bool {
        self.positions.contains(&position)
    }

    pub(crate) fn rename_source_column(&mut self, old: &str, new: &str) {
        for column in &mut self.columns {
            if column.source_column.as_deref() == Some(old) {
                column.name = new.to_string();
                column.source_column = Some(new.to_string());
            }
        }
    }

    /// Atoms contributed by each grouping column for a row, in grouping order.
    pub fn components<'a>(&self, values: &'a [Value]) -> Result<Vec<&'a [Atom]>> {
        self.columns
            .iter()
            .zip(&self.roles)
            .zip(&self.positions)
            .map(|((column, &role), &position)| {
                let value = values
                    .get(position)
                    .ok_or_else(|| SummaryError::MissingValue(column.name.clone()))?;
                value.check_kind(&column.name, role)?;
                Ok(value.atoms())
            })
            .collect()
    }

    /// Every key tuple the row participates in, in deterministic order: the
    /// first grouping column varies slowest, labels follow set order. A row
    /// with an empty label set in any grouping column yields nothing.
    pub fn expand(&self, values: &[Value]) -> Result<Vec<KeyTuple>> {
        let components = self.components(values)?;
        Ok(cartesian(&components))
    }
}

fn cartesian(components: &[&[Atom]]) -> Vec<KeyTuple> {
    if components.iter().any(|atoms| atoms.is_empty()) {
        return Vec::new();
    }

    let capacity: usize = components.iter().map(|atoms| atoms.len()).product();
    let mut prefixes: Vec<Vec<Atom>> = vec![Vec::with_capacity(components.len())];

    for atoms in components {
        let mut next = Vec::with_capacity(prefixes.len() * atoms.len());
        for prefix in &prefixes {
            for atom in atoms.iter() {
                let mut tuple = prefix.clone();
                tuple.push(atom.clone());
                next.push(tuple);
            }
        }
        prefixes = next;
    }

    debug_assert_eq!(prefixes.len(), capacity);
    prefixes.into_iter().map(KeyTuple).collect()
}
