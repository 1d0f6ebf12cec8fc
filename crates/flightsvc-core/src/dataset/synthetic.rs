//! Synthetic datasets for load testing.

use super::{Column, DataType, Dataset, Field, Schema};
use crate::error::Result;

/// The three-row stock quote table used by the load-test client.
pub fn stock_prices() -> Result<Dataset> {
    Dataset::try_new(
        Schema::new(vec![
            Field::new("symbol", DataType::Utf8),
            Field::new("timestamp", DataType::Timestamp),
            Field::new("price", DataType::Float64),
        ]),
        vec![
            Column::from(vec!["AAPL", "GOOG", "MSFT"]),
            Column::Timestamp(vec![Some(1_672_345_600); 3]),
            Column::from(vec![150.0, 110.0, 250.0]),
        ],
    )
}

/// Append `copies` renamed copies of every column.
///
/// Copy `i` of column `name` is called `name_i`; copies are grouped by
/// iteration, so for columns `a, b` and two copies the result is
/// `a, b, a_0, b_0, a_1, b_1`.
pub fn duplicate_columns(dataset: &Dataset, copies: usize) -> Result<Dataset> {
    let mut fields = dataset.schema().fields.clone();
    let mut columns = dataset.columns().to_vec();

    for i in 0..copies {
        for (field, column) in dataset.schema().fields.iter().zip(dataset.columns()) {
            fields.push(Field {
                name: format!("{}_{}", field.name, i),
                ..field.clone()
            });
            columns.push(column.clone());
        }
    }

    Dataset::try_new(Schema::new(fields), columns)
}

/// Double the row count `doublings` times by concatenating the table with itself.
pub fn generate_rows(dataset: &Dataset, doublings: u32) -> Result<Dataset> {
    let mut current = dataset.clone();
    for _ in 0..doublings {
        let mut columns = current.columns().to_vec();
        for (column, again) in columns.iter_mut().zip(current.columns()) {
            column.extend_from(again)?;
        }
        current = Dataset::try_new(current.schema().clone(), columns)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_prices_shape() {
        let ds = stock_prices().unwrap();
        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.schema().names(), vec!["symbol", "timestamp", "price"]);
    }

    #[test]
    fn test_duplicate_columns_naming() {
        let ds = duplicate_columns(&stock_prices().unwrap(), 2).unwrap();
        assert_eq!(ds.num_columns(), 9);
        assert_eq!(
            ds.schema().names()[3..],
            ["symbol_0", "timestamp_0", "price_0", "symbol_1", "timestamp_1", "price_1"]
        );
        assert_eq!(ds.column_by_name("price_1"), ds.column_by_name("price"));
    }

    #[test]
    fn test_generate_rows_doubles() {
        let ds = generate_rows(&stock_prices().unwrap(), 4).unwrap();
        assert_eq!(ds.num_rows(), 3 * 16);
        assert_eq!(ds.num_columns(), 3);
    }

    #[test]
    fn test_zero_copies_is_identity() {
        let base = stock_prices().unwrap();
        assert_eq!(duplicate_columns(&base, 0).unwrap(), base);
        assert_eq!(generate_rows(&base, 0).unwrap(), base);
    }
}
