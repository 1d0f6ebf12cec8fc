//! Typed, nullable column vectors.

use crate::error::{FlightError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Seconds since the Unix epoch.
    Timestamp,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "bool",
            DataType::Int64 => "int64",
            DataType::Float64 => "double",
            DataType::Utf8 => "string",
            DataType::Timestamp => "timestamp[s]",
        };
        f.write_str(name)
    }
}

/// A single column of values. `None` entries are nulls.
///
/// Non-finite floats travel as the strings `"NaN"`, `"inf"` and `"-inf"`
/// since JSON numbers cannot hold them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum Column {
    Boolean(Vec<Option<bool>>),
    Int64(Vec<Option<i64>>),
    Float64(#[serde(with = "float_values")] Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Timestamp(Vec<Option<i64>>),
}

mod float_values {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum WireFloat {
        Finite(f64),
        Special(String),
    }

    impl From<f64> for WireFloat {
        fn from(value: f64) -> Self {
            if value.is_nan() {
                WireFloat::Special("NaN".to_string())
            } else if value == f64::INFINITY {
                WireFloat::Special("inf".to_string())
            } else if value == f64::NEG_INFINITY {
                WireFloat::Special("-inf".to_string())
            } else {
                WireFloat::Finite(value)
            }
        }
    }

    pub fn serialize<S: Serializer>(values: &[Option<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.map(WireFloat::from)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Option<f64>>, D::Error> {
        Vec::<Option<WireFloat>>::deserialize(deserializer)?
            .into_iter()
            .map(|value| match value {
                None => Ok(None),
                Some(WireFloat::Finite(v)) => Ok(Some(v)),
                Some(WireFloat::Special(s)) => match s.as_str() {
                    "NaN" => Ok(Some(f64::NAN)),
                    "inf" => Ok(Some(f64::INFINITY)),
                    "-inf" => Ok(Some(f64::NEG_INFINITY)),
                    other => Err(D::Error::custom(format!("invalid float value '{}'", other))),
                },
            })
            .collect()
    }
}

/// Apply the same expression to the inner vector of every variant.
macro_rules! each_variant {
    ($column:expr, $values:ident => $body:expr) => {
        match $column {
            Column::Boolean($values) => $body,
            Column::Int64($values) => $body,
            Column::Float64($values) => $body,
            Column::Utf8($values) => $body,
            Column::Timestamp($values) => $body,
        }
    };
}

impl Column {
    /// An empty column of the given type.
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Column::Boolean(Vec::new()),
            DataType::Int64 => Column::Int64(Vec::new()),
            DataType::Float64 => Column::Float64(Vec::new()),
            DataType::Utf8 => Column::Utf8(Vec::new()),
            DataType::Timestamp => Column::Timestamp(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Column::Boolean(_) => DataType::Boolean,
            Column::Int64(_) => DataType::Int64,
            Column::Float64(_) => DataType::Float64,
            Column::Utf8(_) => DataType::Utf8,
            Column::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        each_variant!(self, values => values.iter().filter(|v| v.is_none()).count())
    }

    /// Copy `len` rows starting at `offset`, clamped to the column bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Column {
        let start = offset.min(self.len());
        let end = offset.saturating_add(len).min(self.len());
        match self {
            Column::Boolean(v) => Column::Boolean(v[start..end].to_vec()),
            Column::Int64(v) => Column::Int64(v[start..end].to_vec()),
            Column::Float64(v) => Column::Float64(v[start..end].to_vec()),
            Column::Utf8(v) => Column::Utf8(v[start..end].to_vec()),
            Column::Timestamp(v) => Column::Timestamp(v[start..end].to_vec()),
        }
    }

    /// Append the rows of `other`, which must have the same type.
    pub fn extend_from(&mut self, other: &Column) -> Result<()> {
        match (self, other) {
            (Column::Boolean(a), Column::Boolean(b)) => a.extend_from_slice(b),
            (Column::Int64(a), Column::Int64(b)) => a.extend_from_slice(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend_from_slice(b),
            (Column::Utf8(a), Column::Utf8(b)) => a.extend_from_slice(b),
            (Column::Timestamp(a), Column::Timestamp(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(FlightError::validation(
                    "column",
                    format!("cannot append {} values to a {} column", b.data_type(), a.data_type()),
                ))
            }
        }
        Ok(())
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Column::Boolean(values.into_iter().map(Some).collect())
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Column::Int64(values.into_iter().map(Some).collect())
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::Float64(values.into_iter().map(Some).collect())
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::Utf8(values.into_iter().map(|s| Some(s.to_string())).collect())
    }
}

impl From<Vec<String>> for Column {
    fn from(values: Vec<String>) -> Self {
        Column::Utf8(values.into_iter().map(Some).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_clamps_to_bounds() {
        let col = Column::from(vec![1i64, 2, 3, 4]);
        assert_eq!(col.slice(1, 2), Column::from(vec![2i64, 3]));
        assert_eq!(col.slice(3, 10), Column::from(vec![4i64]));
        assert!(col.slice(9, 1).is_empty());
    }

    #[test]
    fn test_extend_rejects_type_mismatch() {
        let mut col = Column::from(vec![1.0f64]);
        let err = col.extend_from(&Column::from(vec!["a"])).unwrap_err();
        assert!(err.to_string().contains("string"));
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn test_null_count() {
        let col = Column::Utf8(vec![Some("a".into()), None, None]);
        assert_eq!(col.null_count(), 2);
        assert_eq!(col.data_type(), DataType::Utf8);
    }

    #[test]
    fn test_wire_shape() {
        let col = Column::Float64(vec![Some(1.5), None]);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json, serde_json::json!({"type": "float64", "values": [1.5, null]}));
    }

    #[test]
    fn test_non_finite_floats_survive_the_wire() {
        let col = Column::Float64(vec![Some(f64::NAN), Some(f64::INFINITY), Some(f64::NEG_INFINITY), None, Some(-0.5)]);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "float64", "values": ["NaN", "inf", "-inf", null, -0.5]})
        );

        let Column::Float64(values) = serde_json::from_value::<Column>(json).unwrap() else {
            panic!("Expected a float64 column");
        };
        assert!(values[0].unwrap().is_nan());
        assert_eq!(values[1..], [Some(f64::INFINITY), Some(f64::NEG_INFINITY), None, Some(-0.5)]);
    }

    #[test]
    fn test_unknown_float_string_is_rejected() {
        let json = serde_json::json!({"type": "float64", "values": ["infinity"]});
        assert!(serde_json::from_value::<Column>(json).is_err());
    }
}
