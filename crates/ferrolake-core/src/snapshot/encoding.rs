//! Batch to Parquet encoding.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::{Batch, StageError, Value};

/// Columns every snapshot starts with, ahead of provider attributes.
pub const FIXED_COLUMNS: [&str; 4] = ["record_id", "provider", "source_scope", "extracted_at"];

#[derive(Debug)]
pub(crate) struct EncodedBatch {
    pub bytes: Vec<u8>,
    pub column_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Int,
    Float,
    Text,
}

impl ColumnType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int(_) => Some(Self::Int),
            Value::Float(_) => Some(Self::Float),
            Value::Text(_) => Some(Self::Text),
        }
    }

    /// Int widens to Float; any other mix is a conflict.
    fn merge(self, other: Self) -> Option<Self> {
        match (self, other) {
            (left, right) if left == right => Some(left),
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => Some(Self::Float),
            _ => None,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Self::Int => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Text => DataType::Utf8,
        }
    }
}

pub(crate) fn encode(batch: &Batch) -> Result<EncodedBatch, StageError> {
    let record_batch = to_record_batch(batch)?;
    let column_count = record_batch.num_columns();

    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), record_batch.schema(), Some(properties))
        .map_err(|error| StageError::serialization(format!("opening parquet writer: {error}")))?;
    writer
        .write(&record_batch)
        .map_err(|error| StageError::serialization(format!("writing record batch: {error}")))?;
    let bytes = writer
        .into_inner()
        .map_err(|error| StageError::serialization(format!("closing parquet writer: {error}")))?;

    Ok(EncodedBatch {
        bytes,
        column_count,
    })
}

fn to_record_batch(batch: &Batch) -> Result<RecordBatch, StageError> {
    let attributes = batch.attribute_names();
    check_column_names(&attributes)?;

    let provider = batch.provider.as_str();
    let mut fields = vec![
        Field::new("record_id", DataType::Utf8, false),
        Field::new("provider", DataType::Utf8, false),
        Field::new("source_scope", DataType::Utf8, false),
        Field::new(
            "extracted_at",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            batch.records.iter().map(|record| record.record_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            batch.records.iter().map(|_| provider),
        )),
        Arc::new(StringArray::from_iter_values(
            batch.records.iter().map(|record| record.source_scope.as_str()),
        )),
        Arc::new(TimestampMicrosecondArray::from_iter_values(
            batch
                .records
                .iter()
                .map(|record| record.extracted_at.unix_timestamp_micros()),
        )),
    ];

    for name in attributes {
        let column_type = infer_type(batch, name)?;
        fields.push(Field::new(name, column_type.data_type(), true));
        columns.push(build_column(batch, name, column_type)?);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .map_err(|error| StageError::serialization(format!("building record batch: {error}")))
}

/// Warehouse columns match case-insensitively, so names must be unique that way.
fn check_column_names(attributes: &[&str]) -> Result<(), StageError> {
    let mut seen: Vec<String> = FIXED_COLUMNS.iter().map(|name| (*name).to_owned()).collect();
    for name in attributes {
        let folded = name.to_ascii_lowercase();
        if name.is_empty() || seen.contains(&folded) {
            return Err(StageError::serialization(format!(
                "attribute '{name}' collides with another column"
            )));
        }
        seen.push(folded);
    }
    Ok(())
}

fn infer_type(batch: &Batch, name: &str) -> Result<ColumnType, StageError> {
    let mut inferred: Option<ColumnType> = None;
    for record in &batch.records {
        let Some(observed) = record.get(name).and_then(ColumnType::of) else {
            continue;
        };
        inferred = match inferred {
            None => Some(observed),
            Some(current) => Some(current.merge(observed).ok_or_else(|| {
                StageError::serialization(format!(
                    "attribute '{name}' mixes {current:?} and {observed:?} values (record {})",
                    record.record_id
                ))
            })?),
        };
    }
    Ok(inferred.unwrap_or(ColumnType::Text))
}

fn build_column(batch: &Batch, name: &str, column_type: ColumnType) -> Result<ArrayRef, StageError> {
    let values = batch.records.iter().map(|record| record.get(name));
    let column: ArrayRef = match column_type {
        ColumnType::Int => Arc::new(
            values
                .map(|value| match value {
                    Some(Value::Int(value)) => Some(*value),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        ColumnType::Float => Arc::new(
            values
                .map(|value| value.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        ColumnType::Text => Arc::new(
            values
                .map(|value| value.and_then(Value::as_str))
                .collect::<StringArray>(),
        ),
    };
    Ok(column)
}

#[cfg(test)]
mod tests {
    use arrow::array::Array;

    use super::*;
    use crate::{ErrorKind, ProviderId, Record, UtcDateTime};

    #[test]
    fn ints_widen_to_float_and_all_null_columns_are_text() {
        let at = UtcDateTime::now();
        let batch = Batch::new(
            ProviderId::Binance,
            at,
            vec![
                Record::new("BTCUSDT", "BTCUSDT", at)
                    .with("last_price", 64_000_i64)
                    .with("best_bid", Value::Null),
                Record::new("ETHUSDT", "ETHUSDT", at)
                    .with("last_price", 3_100.5)
                    .with("best_bid", Value::Null),
            ],
        );

        let record_batch = to_record_batch(&batch).expect("encodable");
        let schema = record_batch.schema();

        assert_eq!(record_batch.num_columns(), 6);
        assert_eq!(schema.field(4).data_type(), &DataType::Float64);
        assert_eq!(schema.field(5).data_type(), &DataType::Utf8);
        assert_eq!(record_batch.column(5).null_count(), 2);
    }

    #[test]
    fn text_after_number_is_a_serialization_error() {
        let at = UtcDateTime::now();
        let batch = Batch::new(
            ProviderId::Github,
            at,
            vec![
                Record::new("1", "rust", at).with("stars", 10_i64),
                Record::new("2", "rust", at).with("stars", "many"),
            ],
        );

        let error = encode(&batch).expect_err("conflicting types");
        assert_eq!(error.kind(), ErrorKind::SerializationError);
    }

    #[test]
    fn attribute_shadowing_a_fixed_column_is_rejected() {
        let at = UtcDateTime::now();
        let batch = Batch::new(
            ProviderId::Github,
            at,
            vec![Record::new("1", "rust", at).with("Record_ID", "dup")],
        );

        assert!(encode(&batch).is_err());
    }
}
