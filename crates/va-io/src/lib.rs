#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use thiserror::Error;

/// Days from 0001-01-01 (CE) to the unix epoch; bridges chrono's
/// `num_days_from_ce` and arrow's `Date32`.
const EPOCH_CE_DAYS: i32 = 719_163;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parquet error in {path}: {source}")]
    Parquet {
        path: PathBuf,
        source: parquet::errors::ParquetError,
    },
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("{path} is missing required column {column}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("{path} column {column} is not {expected}")]
    ColumnType {
        path: PathBuf,
        column: String,
        expected: &'static str,
    },
    #[error("{path} column {column} has an unexpected null at row {row}")]
    NullValue {
        path: PathBuf,
        column: String,
        row: usize,
    },
    #[error("{path} column {column} row {row}: {days} is not a valid Date32 value")]
    InvalidDate {
        path: PathBuf,
        column: String,
        row: usize,
        days: i32,
    },
}

#[must_use]
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_CE_DAYS
}

#[must_use]
pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + EPOCH_CE_DAYS)
}

/// Read every record batch of a parquet file into memory. Table sizes
/// here are bounded by a chamber's voting history, so there is no
/// streaming path.
pub fn read_batches(path: &Path) -> Result<Vec<RecordBatch>, TableError> {
    let file = File::open(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(ParquetRecordBatchReaderBuilder::build)
        .map_err(|source| TableError::Parquet {
            path: path.to_path_buf(),
            source,
        })?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

/// Typed column access over one batch, carrying the file path so every
/// shape error names its source file.
pub struct BatchColumns<'a> {
    path: &'a Path,
    batch: &'a RecordBatch,
}

macro_rules! typed_column {
    ($method:ident, $view:ident, $array:ty, $expected:literal) => {
        pub fn $method(&self, column: &str) -> Result<$view<'_>, TableError> {
            let array = self
                .batch
                .column_by_name(column)
                .ok_or_else(|| TableError::MissingColumn {
                    path: self.path.to_path_buf(),
                    column: column.to_owned(),
                })?;
            let array =
                array
                    .as_any()
                    .downcast_ref::<$array>()
                    .ok_or_else(|| TableError::ColumnType {
                        path: self.path.to_path_buf(),
                        column: column.to_owned(),
                        expected: $expected,
                    })?;
            Ok($view {
                path: self.path,
                column: column.to_owned(),
                array,
            })
        }
    };
}

impl<'a> BatchColumns<'a> {
    #[must_use]
    pub fn new(path: &'a Path, batch: &'a RecordBatch) -> Self {
        Self { path, batch }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    typed_column!(i64, I64Column, Int64Array, "int64");
    typed_column!(f64, F64Column, Float64Array, "float64");
    typed_column!(utf8, Utf8Column, StringArray, "utf8");
    typed_column!(date, DateColumn, Date32Array, "date32");
}

macro_rules! column_view {
    ($view:ident, $array:ty, $value:ty) => {
        #[derive(Debug)]
        pub struct $view<'a> {
            path: &'a Path,
            column: String,
            array: &'a $array,
        }

        impl $view<'_> {
            /// Non-null value at `row`.
            pub fn value(&self, row: usize) -> Result<$value, TableError> {
                self.opt(row).ok_or_else(|| TableError::NullValue {
                    path: self.path.to_path_buf(),
                    column: self.column.clone(),
                    row,
                })
            }
        }
    };
}

column_view!(I64Column, Int64Array, i64);
column_view!(F64Column, Float64Array, f64);
column_view!(Utf8Column, StringArray, String);
column_view!(DateColumn, Date32Array, NaiveDate);

impl I64Column<'_> {
    #[must_use]
    pub fn opt(&self, row: usize) -> Option<i64> {
        if self.array.is_null(row) {
            None
        } else {
            Some(self.array.value(row))
        }
    }
}

impl F64Column<'_> {
    #[must_use]
    pub fn opt(&self, row: usize) -> Option<f64> {
        if self.array.is_null(row) {
            None
        } else {
            Some(self.array.value(row))
        }
    }
}

impl Utf8Column<'_> {
    #[must_use]
    pub fn opt(&self, row: usize) -> Option<String> {
        if self.array.is_null(row) {
            None
        } else {
            Some(self.array.value(row).to_owned())
        }
    }
}

impl DateColumn<'_> {
    #[must_use]
    pub fn opt(&self, row: usize) -> Option<NaiveDate> {
        if self.array.is_null(row) {
            None
        } else {
            date_from_days(self.array.value(row))
        }
    }

    /// Like `value` but distinguishes a null from an out-of-range day
    /// count.
    pub fn checked_value(&self, row: usize) -> Result<NaiveDate, TableError> {
        if self.array.is_null(row) {
            return Err(TableError::NullValue {
                path: self.path.to_path_buf(),
                column: self.column.clone(),
                row,
            });
        }
        let days = self.array.value(row);
        date_from_days(days).ok_or_else(|| TableError::InvalidDate {
            path: self.path.to_path_buf(),
            column: self.column.clone(),
            row,
            days,
        })
    }
}

#[must_use]
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "table".to_owned(), |n| n.to_string_lossy().into_owned());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Write batches to a sibling temp file and rename into place, so a
/// partially written file is never visible under the target name. An
/// empty batch list still produces a valid file carrying the schema.
pub fn write_batches_atomic(
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<(), TableError> {
    let tmp = tmp_sibling(path);
    let result = write_to(&tmp, schema, batches);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }
    fs::rename(&tmp, path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_to(path: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<(), TableError> {
    let file = File::create(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parquet_err = |source| TableError::Parquet {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = ArrowWriter::try_new(file, Arc::clone(&schema), None).map_err(parquet_err)?;
    if batches.is_empty() {
        writer
            .write(&RecordBatch::new_empty(schema))
            .map_err(parquet_err)?;
    } else {
        for batch in batches {
            writer.write(batch).map_err(parquet_err)?;
        }
    }
    writer.close().map_err(parquet_err)?;
    Ok(())
}
