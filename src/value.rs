/// LiveSummary Value Model
///
/// A cell holds either a single `Atom` (scalar columns) or a `LabelSet`
/// (multi-valued "tag set" columns). Grouping keys are built from atoms, so
/// atoms must hash and compare by value. Floats compare by bit pattern.
///
/// # Examples
///
/// ```
/// use livesummary::{Atom, LabelSet, Value};
///
/// let tags = LabelSet::from_iter(["a", "b", "a"]);
/// assert_eq!(tags.len(), 2);
/// assert!(tags.contains(&Atom::from("b")));
///
/// let value = Value::labels(["x", "y"]);
/// assert_eq!(value.atoms().len(), 2);
/// ```

use crate::column::ColumnKind;
use crate::error::{Result, SummaryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single value usable as a grouping key component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Atom {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Atom {
    pub fn is_null(&self) -> bool {
        matches!(self, Atom::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Atom::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Atom::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Atom::Null, Atom::Null) => true,
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            (Atom::Int(a), Atom::Int(b)) => a == b,
            (Atom::Float(a), Atom::Float(b)) => a.to_bits() == b.to_bits(),
            (Atom::Text(a), Atom::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Atom::Null => {}
            Atom::Bool(v) => v.hash(state),
            Atom::Int(v) => v.hash(state),
            Atom::Float(v) => v.to_bits().hash(state),
            Atom::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Null => write!(f, "null"),
            Atom::Bool(v) => write!(f, "{}", v),
            Atom::Int(v) => write!(f, "{}", v),
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::Text(v.to_string())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::Text(v)
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Int(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Float(v)
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Bool(v)
    }
}

/// Ordered, de-duplicated collection of atoms held by a multi-valued cell.
///
/// Labels keep the order in which they first appeared. That order drives the
/// order in which key tuples are enumerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Atom>", into = "Vec<Atom>")]
pub struct LabelSet {
    labels: Vec<Atom>,
}

impl LabelSet {
    pub fn new() -> Self {
        LabelSet { labels: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, atom: &Atom) -> bool {
        self.labels.contains(atom)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Atom> {
        self.labels.iter()
    }

    pub fn as_slice(&self) -> &[Atom] {
        &self.labels
    }

    /// Adds a label at the end. Returns false if it was already present.
    pub fn insert(&mut self, atom: Atom) -> bool {
        if self.contains(&atom) {
            return false;
        }
        self.labels.push(atom);
        true
    }

    /// Removes a label. Returns false if it was not present.
    pub fn remove(&mut self, atom: &Atom) -> bool {
        match self.labels.iter().position(|a| a == atom) {
            Some(pos) => {
                self.labels.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns a copy with every label passed through `rename`, keeping
    /// positions. Labels that collide after renaming collapse onto the first.
    pub fn map_labels<F>(&self, rename: F) -> LabelSet
    where
        F: Fn(&Atom) -> Option<Atom>,
    {
        self.labels
            .iter()
            .map(|atom| rename(atom).unwrap_or_else(|| atom.clone()))
            .collect()
    }

    /// Labels present in `self` but not in `other`, in `self` order.
    pub fn difference<'a>(&'a self, other: &'a LabelSet) -> impl Iterator<Item = &'a Atom> + 'a {
        self.labels.iter().filter(move |atom| !other.contains(atom))
    }
}

impl From<Vec<Atom>> for LabelSet {
    fn from(labels: Vec<Atom>) -> Self {
        labels.into_iter().collect()
    }
}

impl From<LabelSet> for Vec<Atom> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}

impl<A: Into<Atom>> FromIterator<A> for LabelSet {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for atom in iter {
            set.insert(atom.into());
        }
        set
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Atom;
    type IntoIter = std::slice::Iter<'a, Atom>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}

/// A cell value: one atom, or a set of labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Set(LabelSet),
    Scalar(Atom),
}

impl Value {
    pub fn null() -> Self {
        Value::Scalar(Atom::Null)
    }

    pub fn scalar(atom: impl Into<Atom>) -> Self {
        Value::Scalar(atom.into())
    }

    pub fn labels<I, A>(labels: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        Value::Set(labels.into_iter().collect())
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::Scalar(_) => ColumnKind::Scalar,
            Value::Set(_) => ColumnKind::MultiValued,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Set(_) => "label set",
        }
    }

    pub fn as_scalar(&self) -> Option<&Atom> {
        match self {
            Value::Scalar(atom) => Some(atom),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&LabelSet> {
        match self {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    /// The atoms this value contributes to key tuples: one for a scalar, each
    /// label for a set.
    pub fn atoms(&self) -> &[Atom] {
        match self {
            Value::Scalar(atom) => std::slice::from_ref(atom),
            Value::Set(set) => set.as_slice(),
        }
    }

    /// True if the value equals (scalar) or contains (set) the atom.
    pub fn contains(&self, atom: &Atom) -> bool {
        match self {
            Value::Scalar(a) => a == atom,
            Value::Set(set) => set.contains(atom),
        }
    }

    /// Rejects a value whose shape doesn't match the column kind. No coercion.
    pub fn check_kind(&self, column: &str, expected: ColumnKind) -> Result<()> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(SummaryError::TypeMismatch {
                column: column.to_string(),
                expected,
                found: self.kind_name(),
            })
        }
    }

    /// Converts a stored value to another column kind.
    ///
    /// Scalars become singleton sets (`Null` becomes the empty set). Sets with
    /// at most one label become scalars (empty becomes `Null`); larger sets
    /// cannot be converted.
    pub fn convert(&self, column: &str, target: ColumnKind) -> Result<Value> {
        match (self, target) {
            (Value::Scalar(_), ColumnKind::Scalar) | (Value::Set(_), ColumnKind::MultiValued) => {
                Ok(self.clone())
            }
            (Value::Scalar(Atom::Null), ColumnKind::MultiValued) => Ok(Value::Set(LabelSet::new())),
            (Value::Scalar(atom), ColumnKind::MultiValued) => {
                Ok(Value::Set(LabelSet::from_iter([atom.clone()])))
            }
            (Value::Set(set), ColumnKind::Scalar) => match set.as_slice() {
                [] => Ok(Value::null()),
                [atom] => Ok(Value::Scalar(atom.clone())),
                _ => Err(SummaryError::TypeMismatch {
                    column: column.to_string(),
                    expected: ColumnKind::Scalar,
                    found: "label set with several labels",
                }),
            },
        }
    }
}

impl From<Atom> for Value {
    fn from(atom: Atom) -> Self {
        Value::Scalar(atom)
    }
}

impl From<LabelSet> for Value {
    fn from(set: LabelSet) -> Self {
        Value::Set(set)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(v.into())
    }
}
