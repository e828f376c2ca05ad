//! Columnar tables exchanged as blobs.
//!
//! Wire format: `{"columns": [{"name": "x1", "values": [1.0, 2.0]}, ...]}`.

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Name of the training target column.
pub const TARGET_COLUMN: &str = "y";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table; every column must have the same length and a unique name.
    pub fn new(columns: Vec<Column>) -> Result<Self, ComputeError> {
        let table = Self { columns };
        table.validate()?;
        Ok(table)
    }

    pub fn single(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            columns: vec![Column::new(name, values)],
        }
    }

    fn validate(&self) -> Result<(), ComputeError> {
        let rows = self.row_count();
        for (i, column) in self.columns.iter().enumerate() {
            if column.values.len() != rows {
                return Err(ComputeError::InvalidInput(format!(
                    "column '{}' has {} rows, expected {rows}",
                    column.name,
                    column.values.len()
                )));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(ComputeError::InvalidInput(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ComputeError> {
        let table: Table = serde_json::from_slice(bytes).map_err(|e| ComputeError::Decode {
            what: "table",
            reason: e.to_string(),
        })?;
        table.validate()?;
        Ok(table)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ComputeError> {
        serde_json::to_vec(self).map_err(|e| ComputeError::Encode {
            what: "table",
            reason: e.to_string(),
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// Remove a column, returning its values.
    pub fn drop_column(&mut self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx).values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_format() {
        let bytes = br#"{"columns":[{"name":"x","values":[1.0,2.0]},{"name":"y","values":[0,1]}]}"#;
        let table = Table::from_bytes(bytes).unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("y"), Some(&[0.0, 1.0][..]));
        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn ragged_or_duplicate_columns_are_rejected() {
        let ragged = br#"{"columns":[{"name":"x","values":[1.0]},{"name":"y","values":[0,1]}]}"#;
        assert!(matches!(Table::from_bytes(ragged), Err(ComputeError::InvalidInput(_))));

        let duplicate = Table::new(vec![
            Column::new("x", vec![1.0]),
            Column::new("x", vec![2.0]),
        ]);
        assert!(matches!(duplicate, Err(ComputeError::InvalidInput(_))));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            Table::from_bytes(b"a,b\n1,2\n"),
            Err(ComputeError::Decode { what: "table", .. })
        ));
    }

    #[test]
    fn drop_column_removes_it() {
        let mut table = Table::new(vec![
            Column::new("x", vec![1.0, 2.0]),
            Column::new("y", vec![0.0, 1.0]),
        ])
        .unwrap();

        assert_eq!(table.drop_column("y"), Some(vec![0.0, 1.0]));
        assert_eq!(table.drop_column("y"), None);
        assert_eq!(table.columns().len(), 1);
        assert_eq!(table.row_count(), 2);
    }
}
