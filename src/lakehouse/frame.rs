use std::fmt::{self, Display, Formatter};

use ordered_float::OrderedFloat;

use crate::error::FrameError;

/// A single cell.
///
/// Floats are wrapped in [`OrderedFloat`] so rows can be hashed, ordered and
/// compared as sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(value.0),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(OrderedFloat(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// An ordered list of named cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Row(Vec<(String, Value)>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cell.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((column.into(), value.into()));
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn rename(self, columns: &[String]) -> Self {
        Row(columns
            .iter()
            .cloned()
            .zip(self.0.into_iter().map(|(_, value)| value))
            .collect())
    }
}

impl Display for Row {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Row(")?;
        for (i, (column, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        f.write_str(")")
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row(iter
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect())
    }
}

/// Builds a [`Row`] from `column => value` pairs.
///
/// ```
/// let row = kumiki::row! { "num" => 1, "name" => "one" };
/// assert_eq!(row.get("num"), Some(&kumiki::Value::Int(1)));
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {
        $crate::Row::new()$(.with($column, $value))+
    };
}

/// A small row-oriented table: ordered columns and ordered rows.
///
/// Every row carries exactly the frame's columns, in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Frame {
    /// An empty frame with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Collects rows into a frame. The columns are taken from the first row.
    pub fn from_rows<I>(rows: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut rows = rows.into_iter().peekable();
        let columns = rows
            .peek()
            .map(|row| row.columns().map(String::from).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut frame = Frame::new(columns);
        for row in rows {
            frame.push(row)?;
        }

        Ok(frame)
    }

    pub fn push(&mut self, row: Row) -> Result<(), FrameError> {
        if !row.columns().eq(self.columns.iter().map(String::as_str)) {
            return Err(FrameError::SchemaMismatch {
                expected: self.columns.clone(),
                found: row.columns().map(String::from).collect(),
            });
        }

        self.rows.push(row);
        Ok(())
    }

    /// Appends the rows of `other`, matching columns by position. The result
    /// keeps this frame's column names.
    pub fn union(mut self, other: Frame) -> Result<Frame, FrameError> {
        if self.columns.len() != other.columns.len() {
            return Err(FrameError::ColumnCount {
                left: self.columns.len(),
                right: other.columns.len(),
            });
        }

        let columns = self.columns.clone();
        self.rows
            .extend(other.rows.into_iter().map(|row| row.rename(&columns)));

        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of `column`, top to bottom.
    pub fn column(&self, column: &str) -> Option<impl Iterator<Item = &Value>> {
        let index = self.columns.iter().position(|name| name == column)?;
        Some(self.rows.iter().map(move |row| &row.0[index].1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_from_rows_takes_first_schema() {
        let frame = Frame::from_rows([row! { "num" => 1 }, row! { "num" => 2 }]).unwrap();

        assert_eq!(frame.columns(), ["num"]);
        assert_eq!(frame.len(), 2);
        assert_eq!(
            frame.column("num").unwrap().cloned().collect::<Vec<_>>(),
            vec![Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_push_rejects_other_schema() {
        let mut frame = Frame::new(["num"]);
        let err = frame.push(row! { "count" => 1 }).unwrap_err();

        assert_eq!(
            err,
            FrameError::SchemaMismatch {
                expected: vec!["num".into()],
                found: vec!["count".into()],
            }
        );
    }

    #[test]
    fn test_union_is_positional() {
        let left = Frame::from_rows([row! { "num" => 1 }]).unwrap();
        let right = Frame::from_rows([row! { "value" => 2 }]).unwrap();

        let union = left.union(right).unwrap();
        assert_eq!(union.rows(), [row! { "num" => 1 }, row! { "num" => 2 }]);

        let wide = Frame::from_rows([row! { "a" => 1, "b" => 2 }]).unwrap();
        assert_eq!(
            union.union(wide).unwrap_err(),
            FrameError::ColumnCount { left: 1, right: 2 }
        );
    }

    #[test]
    fn test_rows_compare_as_sets() {
        use std::collections::BTreeSet;

        let a: BTreeSet<_> = [row! { "x" => 1.5 }, row! { "x" => Value::Null }].into();
        let b: BTreeSet<_> = [row! { "x" => Value::Null }, row! { "x" => 1.5 }].into();
        assert_eq!(a, b);
    }

    #[test]
    fn test_row_display() {
        let row = row! { "num" => 1, "name" => "one", "ok" => true };
        assert_eq!(row.to_string(), "Row(num=1, name=one, ok=true)");
    }
}
