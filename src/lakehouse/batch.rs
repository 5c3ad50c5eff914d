//! Conversions between frames and Arrow record batches.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float32Array, Float64Array, Float64Builder,
    Int32Array, Int64Array, Int64Builder, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::LakehouseError;
use crate::lakehouse::{Frame, Row, Value};

/// Arrow type for a column, from the values it holds. Integers widen to
/// floats when both appear; a column of nulls becomes a string column.
fn column_type(frame: &Frame, index: usize) -> Result<DataType, LakehouseError> {
    let mut found: Option<&Value> = None;
    let mut float = false;

    for value in frame.rows().iter().map(|row| row_value(row, index)) {
        if value.is_null() {
            continue;
        }

        float |= matches!(value, Value::Float(_));

        match found {
            None => found = Some(value),
            Some(seen) => {
                let numeric = matches!(
                    (seen, value),
                    (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
                );

                if !numeric && seen.type_name() != value.type_name() {
                    return Err(LakehouseError::MixedColumn {
                        column: frame.columns()[index].clone(),
                        left: seen.type_name(),
                        right: value.type_name(),
                    });
                }
            }
        }
    }

    Ok(match found {
        None | Some(Value::Null) | Some(Value::Str(_)) => DataType::Utf8,
        Some(Value::Bool(_)) => DataType::Boolean,
        Some(Value::Int(_)) if !float => DataType::Int64,
        Some(Value::Int(_) | Value::Float(_)) => DataType::Float64,
    })
}

fn row_value(row: &Row, index: usize) -> &Value {
    row.values().nth(index).unwrap_or(&Value::Null)
}

fn build_column(frame: &Frame, index: usize, data_type: &DataType) -> ArrayRef {
    let values = frame.rows().iter().map(|row| row_value(row, index));

    match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for value in values {
                builder.append_option(value.as_bool());
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for value in values {
                builder.append_option(value.as_int());
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for value in values {
                builder.append_option(value.as_float());
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for value in values {
                builder.append_option(value.as_str());
            }
            Arc::new(builder.finish())
        }
    }
}

/// Converts `frame` into a single record batch, or `None` for a frame
/// without columns.
pub(crate) fn frame_to_batch(frame: &Frame) -> Result<Option<RecordBatch>, LakehouseError> {
    if frame.columns().is_empty() {
        return Ok(None);
    }

    let mut fields = Vec::with_capacity(frame.columns().len());
    let mut columns = Vec::with_capacity(frame.columns().len());

    for (index, name) in frame.columns().iter().enumerate() {
        let data_type = column_type(frame, index)?;
        columns.push(build_column(frame, index, &data_type));
        fields.push(Field::new(name, data_type, true));
    }

    Ok(Some(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T, LakehouseError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| LakehouseError::UnsupportedType(array.data_type().to_string()))
}

/// Reads one column of a batch into frame values.
fn column_values(array: &ArrayRef) -> Result<Vec<Value>, LakehouseError> {
    let len = array.len();
    let cell = |i: usize, value: Value| if array.is_null(i) { Value::Null } else { value };

    Ok(match array.data_type() {
        DataType::Null => vec![Value::Null; len],
        DataType::Boolean => {
            let array = downcast::<BooleanArray>(array)?;
            (0..len).map(|i| cell(i, Value::Bool(array.value(i)))).collect()
        }
        DataType::Int32 => {
            let array = downcast::<Int32Array>(array)?;
            (0..len).map(|i| cell(i, array.value(i).into())).collect()
        }
        DataType::Int64 => {
            let array = downcast::<Int64Array>(array)?;
            (0..len).map(|i| cell(i, array.value(i).into())).collect()
        }
        DataType::Float32 => {
            let array = downcast::<Float32Array>(array)?;
            (0..len)
                .map(|i| cell(i, f64::from(array.value(i)).into()))
                .collect()
        }
        DataType::Float64 => {
            let array = downcast::<Float64Array>(array)?;
            (0..len).map(|i| cell(i, array.value(i).into())).collect()
        }
        DataType::Utf8 => {
            let array = downcast::<StringArray>(array)?;
            (0..len).map(|i| cell(i, array.value(i).into())).collect()
        }
        other => return Err(LakehouseError::UnsupportedType(other.to_string())),
    })
}

/// Appends the rows of `batch` to `frame`. The first batch fixes the columns.
pub(crate) fn append_batch(frame: &mut Option<Frame>, batch: &RecordBatch) -> Result<(), LakehouseError> {
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|field| field.name().as_str()).collect();
    let frame = frame.get_or_insert_with(|| Frame::new(names.iter().copied()));

    let columns = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>, _>>()?;

    for i in 0..batch.num_rows() {
        let row = names
            .iter()
            .zip(&columns)
            .map(|(name, values)| (*name, values[i].clone()))
            .collect::<Row>();

        // Parts written by other tools may name columns differently; match
        // them to the first part by position.
        if row.columns().ne(frame.columns().iter().map(String::as_str)) {
            let other = Frame::from_rows([row])?;
            *frame = std::mem::take(frame).union(other)?;
        } else {
            frame.push(row)?;
        }
    }

    Ok(())
}
