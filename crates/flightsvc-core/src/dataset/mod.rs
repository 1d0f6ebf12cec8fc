//! In-memory columnar datasets.
//!
//! A [`Dataset`] is a schema plus one [`Column`] per field, all of equal
//! length. Datasets travel over the wire as a sequence of [`RecordBatch`]es
//! and are reassembled with a [`DatasetBuilder`].

mod column;
pub mod synthetic;

pub use column::{Column, DataType};

use crate::config::BrokerConfig;
use crate::error::{FlightError, Result};
use serde::{Deserialize, Serialize};

/// A named, typed column slot in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

/// Ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check that `columns` line up with this schema and share one length.
    ///
    /// Returns the common row count.
    fn validate(&self, columns: &[Column]) -> Result<usize> {
        if columns.len() != self.fields.len() {
            return Err(FlightError::validation(
                "columns",
                format!(
                    "expected {} columns, got {}",
                    self.fields.len(),
                    columns.len()
                ),
            ));
        }

        let rows = columns.first().map(Column::len).unwrap_or(0);
        for (field, column) in self.fields.iter().zip(columns) {
            if column.data_type() != field.data_type {
                return Err(FlightError::validation(
                    field.name.clone(),
                    format!(
                        "expected {} column, got {}",
                        field.data_type,
                        column.data_type()
                    ),
                ));
            }
            if column.len() != rows {
                return Err(FlightError::validation(
                    field.name.clone(),
                    format!("expected {} rows, got {}", rows, column.len()),
                ));
            }
            if !field.nullable && column.null_count() > 0 {
                return Err(FlightError::validation(
                    field.name.clone(),
                    "null value in non-nullable field",
                ));
            }
        }
        Ok(rows)
    }
}

/// A chunk of rows; columns follow the schema sent ahead of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<Column>,
}

impl RecordBatch {
    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }
}

/// An immutable columnar table.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    columns: Vec<Column>,
    num_rows: usize,
}

impl Dataset {
    /// Build a dataset, validating column count, types and lengths.
    pub fn try_new(schema: Schema, columns: Vec<Column>) -> Result<Self> {
        let num_rows = schema.validate(&columns)?;
        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Build a dataset from `(name, column)` pairs; every field is nullable.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        let (fields, columns): (Vec<Field>, Vec<Column>) = columns
            .into_iter()
            .map(|(name, column)| (Field::new(name, column.data_type()), column))
            .unzip();
        Self::try_new(Schema::new(fields), columns)
    }

    /// A dataset with the given schema and no rows.
    pub fn empty(schema: Schema) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| Column::empty(f.data_type))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).and_then(|i| self.columns.get(i))
    }

    /// Split into record batches of at most `max_rows` rows.
    pub fn batches(&self, max_rows: usize) -> impl Iterator<Item = RecordBatch> + '_ {
        let max_rows = max_rows.max(1);
        (0..self.num_rows).step_by(max_rows).map(move |offset| RecordBatch {
            columns: self
                .columns
                .iter()
                .map(|c| c.slice(offset, max_rows))
                .collect(),
        })
    }

    /// Reassemble a dataset from batches.
    pub fn from_batches<I>(schema: Schema, batches: I) -> Result<Self>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        let mut builder = DatasetBuilder::new(schema);
        for batch in batches {
            builder.push(batch)?;
        }
        Ok(builder.finish())
    }

    /// Size in bytes of this dataset when streamed as record batch frames.
    pub fn encoded_size(&self) -> u64 {
        self.batches(BrokerConfig::BATCH_ROWS)
            .map(|batch| {
                let payload = serde_json::to_vec(&batch).map(|b| b.len()).unwrap_or(0);
                // 4-byte frame length prefix
                (payload + 4) as u64
            })
            .sum()
    }
}

/// Accumulates record batches into a [`Dataset`].
///
/// Every batch is validated before it is appended, so a rejected batch leaves
/// the builder unchanged.
#[derive(Debug)]
pub struct DatasetBuilder {
    schema: Schema,
    columns: Vec<Column>,
    num_rows: usize,
}

impl DatasetBuilder {
    pub fn new(schema: Schema) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| Column::empty(f.data_type))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    pub fn push(&mut self, batch: RecordBatch) -> Result<()> {
        let rows = self.schema.validate(&batch.columns)?;
        for (column, incoming) in self.columns.iter_mut().zip(&batch.columns) {
            column.extend_from(incoming)?;
        }
        self.num_rows += rows;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn finish(self) -> Dataset {
        Dataset {
            schema: self.schema,
            columns: self.columns,
            num_rows: self.num_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stocks() -> Dataset {
        Dataset::from_columns(vec![
            ("symbol", Column::from(vec!["AAPL", "GOOG", "MSFT"])),
            ("price", Column::from(vec![150.0, 110.0, 250.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_counts() {
        let ds = stocks();
        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.num_columns(), 2);
        assert_eq!(ds.schema().names(), vec!["symbol", "price"]);
        assert_eq!(
            ds.column_by_name("price"),
            Some(&Column::from(vec![150.0, 110.0, 250.0]))
        );
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let result = Dataset::from_columns(vec![
            ("a", Column::from(vec![1i64, 2])),
            ("b", Column::from(vec![1i64])),
        ]);
        assert!(matches!(result, Err(FlightError::Validation { .. })));
    }

    #[test]
    fn test_batches_reassemble() {
        let ds = stocks();
        let batches: Vec<_> = ds.batches(2).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].num_rows(), 2);
        assert_eq!(batches[1].num_rows(), 1);

        let rebuilt = Dataset::from_batches(ds.schema().clone(), batches).unwrap();
        assert_eq!(rebuilt, ds);
    }

    #[test]
    fn test_empty_dataset_has_no_batches() {
        let ds = Dataset::empty(stocks().schema().clone());
        assert_eq!(ds.batches(10).count(), 0);
        assert_eq!(ds.num_columns(), 2);
        assert_eq!(ds.encoded_size(), 0);
    }

    #[test]
    fn test_builder_rejects_mismatched_batch_without_side_effects() {
        let ds = stocks();
        let mut builder = DatasetBuilder::new(ds.schema().clone());
        builder.push(ds.batches(10).next().unwrap()).unwrap();

        let bad = RecordBatch {
            columns: vec![Column::from(vec![1i64]), Column::from(vec![1.0])],
        };
        assert!(builder.push(bad).is_err());
        assert_eq!(builder.num_rows(), 3);
        assert_eq!(builder.finish(), ds);
    }

    #[test]
    fn test_non_nullable_field_rejects_nulls() {
        let schema = Schema::new(vec![Field {
            name: "id".into(),
            data_type: DataType::Int64,
            nullable: false,
        }]);
        let result = Dataset::try_new(schema, vec![Column::Int64(vec![Some(1), None])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encoded_size_grows_with_rows() {
        let small = stocks();
        let big = synthetic::generate_rows(&small, 3).unwrap();
        assert!(small.encoded_size() > 0);
        assert!(big.encoded_size() > small.encoded_size());
    }
}
