//! Columnar table codecs and the registry that makes them available.
//!
//! The engine never encodes columnar files itself; it hands whole tables to a
//! [`TableCodec`]. Codecs are optional capabilities: a [`CodecRegistry`] is
//! passed explicitly to the appender and planner, and a missing codec surfaces
//! as [`ExportError::CodecUnavailable`].

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int32Type, Int64Type, Schema, SchemaRef,
};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

use crate::error::{ExportError, Result};
use crate::value::{RowBatch, Value};

/// Reads and writes whole tables in a columnar file format.
pub trait TableCodec: Debug + Send + Sync {
    /// Short codec name, e.g. `"parquet"`.
    fn name(&self) -> &str;

    /// Writes `rows` to `path`, replacing any existing file.
    ///
    /// Columns named in `schema` keep their stored type; the rest are
    /// inferred from the values.
    fn write_table(&self, rows: &RowBatch, schema: Option<&Schema>, path: &Path) -> Result<()>;

    /// Reads every row stored at `path` together with the stored row count.
    fn read_table(&self, path: &Path) -> Result<(RowBatch, u64)>;

    /// Schema of the table stored at `path`, without decoding its rows.
    fn read_schema(&self, path: &Path) -> Result<SchemaRef>;
}

/// Optional codec capabilities available to an append or simulation.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    columnar: Option<Arc<dyn TableCodec>>,
}

impl Default for CodecRegistry {
    /// Registers every codec compiled into the crate.
    fn default() -> Self {
        #[cfg(feature = "parquet")]
        {
            Self::empty().with_columnar(Arc::new(ParquetCodec::new()))
        }
        #[cfg(not(feature = "parquet"))]
        {
            Self::empty()
        }
    }
}

impl CodecRegistry {
    /// A registry without any codec.
    pub fn empty() -> Self {
        Self { columnar: None }
    }

    /// Registers the codec used for columnar sinks.
    pub fn with_columnar(mut self, codec: Arc<dyn TableCodec>) -> Self {
        self.columnar = Some(codec);
        self
    }

    /// The columnar codec, if registered.
    pub fn columnar(&self) -> Option<&Arc<dyn TableCodec>> {
        self.columnar.as_ref()
    }

    /// The columnar codec, or `CodecUnavailable` naming what it was needed for.
    pub fn require_columnar(&self, purpose: &str) -> Result<&dyn TableCodec> {
        self.columnar
            .as_deref()
            .ok_or_else(|| ExportError::codec_unavailable("columnar", purpose.to_string()))
    }
}

/// Converts rows to an Arrow record batch, inferring one type per column.
///
/// Integer columns become `Int64`, mixed integer/float columns `Float64`,
/// boolean columns `Boolean`; anything else (including all-null columns) is
/// stored as `Utf8` canonical text.
pub fn to_record_batch(rows: &RowBatch) -> Result<RecordBatch> {
    to_record_batch_with(rows, None)
}

/// Converts rows to an Arrow record batch, keeping the type each column has
/// in `schema` and inferring the others.
///
/// Fails when a value cannot be stored in its column's type.
pub fn to_record_batch_with(rows: &RowBatch, schema: Option<&Schema>) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(rows.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(rows.columns().len());

    for (idx, column) in rows.columns().iter().enumerate() {
        let values: Vec<&Value> = rows.rows().iter().map(|row| &row[idx]).collect();
        let stored = schema
            .and_then(|s| s.field_with_name(column).ok())
            .map(|f| f.data_type().clone());
        let array = match stored {
            Some(data_type) => {
                let built = build_array(column, &values, &build_type(&data_type))?;
                if built.data_type() == &data_type {
                    built
                } else {
                    let options = CastOptions {
                        safe: false,
                        ..Default::default()
                    };
                    cast_with_options(&built, &data_type, &options)?
                }
            }
            None => build_array(column, &values, &infer_type(&values))?,
        };
        fields.push(Field::new(column, array.data_type().clone(), true));
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Whether `value` can be stored in a column of `data_type`.
pub fn representable(value: &Value, data_type: &DataType) -> bool {
    if matches!(data_type, DataType::Utf8 | DataType::LargeUtf8) {
        return true;
    }
    match value {
        Value::Null => true,
        Value::Int(_) => data_type.is_numeric(),
        Value::Float(_) => data_type.is_numeric() && !data_type.is_integer(),
        Value::Bool(_) => *data_type == DataType::Boolean,
        Value::Str(_) => !data_type.is_numeric() && *data_type != DataType::Boolean,
    }
}

/// The array type built before casting to a stored `data_type`.
fn build_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Boolean => DataType::Boolean,
        t if t.is_integer() => DataType::Int64,
        t if t.is_numeric() => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn build_array(column: &str, values: &[&Value], data_type: &DataType) -> Result<ArrayRef> {
    let unrepresentable = |value: &Value| {
        ExportError::Internal(format!(
            "value {value} of column '{column}' cannot be stored as {data_type}"
        ))
    };
    let array: ArrayRef = match data_type {
        DataType::Int64 => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Int(i) => Ok(Some(*i)),
                    other => Err(unrepresentable(*other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Int(i) => Ok(Some(*i as f64)),
                    Value::Float(f) => Ok(Some(*f)),
                    other => Err(unrepresentable(*other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        DataType::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bool(b) => Ok(Some(*b)),
                    other => Err(unrepresentable(*other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        _ => Arc::new(StringArray::from(
            values.iter().map(|v| v.canonical()).collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

/// Converts Arrow record batches sharing `schema` back into rows.
pub fn from_record_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<RowBatch> {
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let mut rows = Vec::new();
    for batch in batches {
        let decoded: Vec<Vec<Value>> = batch
            .columns()
            .iter()
            .map(array_values)
            .collect::<Result<_>>()?;
        for row_idx in 0..batch.num_rows() {
            rows.push(decoded.iter().map(|col| col[row_idx].clone()).collect());
        }
    }
    RowBatch::new(columns, rows)
}

fn infer_type(values: &[&Value]) -> DataType {
    let (mut ints, mut floats, mut bools, mut other) = (0, 0, 0, 0);
    for value in values {
        match value {
            Value::Null => {}
            Value::Int(_) => ints += 1,
            Value::Float(_) => floats += 1,
            Value::Bool(_) => bools += 1,
            Value::Str(_) => other += 1,
        }
    }
    match (ints, floats, bools, other) {
        (0, 0, 0, 0) => DataType::Utf8,
        (_, 0, 0, 0) => DataType::Int64,
        (_, _, 0, 0) => DataType::Float64,
        (0, 0, _, 0) => DataType::Boolean,
        _ => DataType::Utf8,
    }
}

fn array_values(array: &ArrayRef) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(array.len());
    for i in 0..array.len() {
        if array.is_null(i) {
            out.push(Value::Null);
            continue;
        }
        let value = match array.data_type() {
            DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(i)),
            DataType::Int32 => Value::Int(i64::from(array.as_primitive::<Int32Type>().value(i))),
            DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(i)),
            DataType::Float32 => {
                Value::Float(f64::from(array.as_primitive::<Float32Type>().value(i)))
            }
            DataType::Boolean => Value::Bool(array.as_boolean().value(i)),
            DataType::Utf8 => Value::Str(array.as_string::<i32>().value(i).to_string()),
            DataType::LargeUtf8 => Value::Str(array.as_string::<i64>().value(i).to_string()),
            _ => Value::Str(array_value_to_string(array.as_ref(), i)?),
        };
        out.push(value);
    }
    Ok(out)
}

#[cfg(feature = "parquet")]
pub use self::parquet_codec::ParquetCodec;

#[cfg(feature = "parquet")]
mod parquet_codec {
    use std::fs::File;
    use std::path::Path;

    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::arrow::ArrowWriter;
    use parquet::basic::Compression;
    use parquet::file::properties::WriterProperties;
    use tracing::{debug, instrument};

    use arrow::datatypes::{Schema, SchemaRef};

    use super::{from_record_batches, to_record_batch_with, TableCodec};
    use crate::error::Result;
    use crate::value::RowBatch;

    /// Parquet table codec (Snappy-compressed).
    #[derive(Debug, Clone, Default)]
    pub struct ParquetCodec {
        compression: Option<Compression>,
    }

    impl ParquetCodec {
        /// Creates a codec writing Snappy-compressed files.
        pub fn new() -> Self {
            Self {
                compression: Some(Compression::SNAPPY),
            }
        }

        /// Writes uncompressed files.
        pub fn uncompressed() -> Self {
            Self { compression: None }
        }
    }

    impl TableCodec for ParquetCodec {
        fn name(&self) -> &str {
            "parquet"
        }

        #[instrument(skip(self, rows, schema), fields(rows = rows.len()))]
        fn write_table(&self, rows: &RowBatch, schema: Option<&Schema>, path: &Path) -> Result<()> {
            let batch = to_record_batch_with(rows, schema)?;
            let props = WriterProperties::builder()
                .set_compression(self.compression.unwrap_or(Compression::UNCOMPRESSED))
                .build();
            let file = File::create(path)?;
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
            debug!(path = %path.display(), "Wrote parquet table");
            Ok(())
        }

        #[instrument(skip(self))]
        fn read_table(&self, path: &Path) -> Result<(RowBatch, u64)> {
            let file = File::open(path)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
            let stored_rows = builder.metadata().file_metadata().num_rows();
            let schema = builder.schema().clone();
            let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
            let rows = from_record_batches(&schema, &batches)?;
            Ok((rows, u64::try_from(stored_rows).unwrap_or(0)))
        }

        fn read_schema(&self, path: &Path) -> Result<SchemaRef> {
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
            Ok(builder.schema().clone())
        }
    }
}
