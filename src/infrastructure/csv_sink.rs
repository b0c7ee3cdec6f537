//! Append-only CSV output
//!
//! The sink is owned by the coordinating task. Every `append` writes the
//! coerced rows and flushes before returning, so an interrupted run keeps
//! every batch that was appended before the interruption.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Record, RecordSchema, SchemaError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Record does not fit schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Existing header in {path} does not match schema (found {found:?}, expected {expected:?})")]
    HeaderMismatch {
        path: PathBuf,
        found: Vec<String>,
        expected: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CsvSinkOptions {
    /// Prefix a fresh file with a UTF-8 byte-order mark for spreadsheet tools
    pub write_bom: bool,
}

#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    schema: RecordSchema,
    options: CsvSinkOptions,
    header_written: bool,
    rows_written: usize,
}

impl CsvSink {
    /// Open (or prepare to create) the output file.
    ///
    /// An existing non-empty file must start with the schema's header.
    pub fn open(
        path: impl AsRef<Path>,
        schema: RecordSchema,
        options: CsvSinkOptions,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let header_written = match read_existing_header(&path)? {
            Some(found) => {
                let expected: Vec<String> = schema.columns().to_vec();
                if found != expected {
                    return Err(SinkError::HeaderMismatch {
                        path,
                        found,
                        expected,
                    });
                }
                info!("Resuming CSV output at {}", path.display());
                true
            }
            None => false,
        };

        Ok(Self {
            path,
            schema,
            options,
            header_written,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Rows appended through this handle
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Append rows, writing the header first on a fresh file.
    ///
    /// All rows are coerced before anything touches the file, so a schema
    /// violation leaves the output unchanged.
    pub fn append(&mut self, records: &[Record]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records
            .iter()
            .map(|record| self.schema.coerce(record))
            .collect::<Result<Vec<_>, _>>()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        let file = self.write_rows(file, &rows)?;
        file.sync_data().map_err(|source| self.io_error(source))?;

        self.rows_written += rows.len();
        debug!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }

    /// Header (once) and rows, flushed. The header counts as written as
    /// soon as it reaches the output, even if a later row fails.
    fn write_rows<W: Write>(&mut self, mut out: W, rows: &[Vec<String>]) -> Result<W, SinkError> {
        if !self.header_written && self.options.write_bom {
            out.write_all(UTF8_BOM).map_err(|source| self.io_error(source))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(out);

        if !self.header_written {
            writer
                .write_record(self.schema.header())
                .map_err(|source| self.csv_error(source))?;
            writer.flush().map_err(|source| self.io_error(source))?;
            self.header_written = true;
        }
        for row in rows {
            writer
                .write_record(row)
                .map_err(|source| self.csv_error(source))?;
        }
        writer.flush().map_err(|source| self.io_error(source))?;

        writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> SinkError {
        SinkError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// First record of an existing, non-empty file (BOM stripped)
fn read_existing_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SinkError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);
    match reader.records().next() {
        Some(Ok(record)) => Ok(Some(record.iter().map(str::to_string).collect())),
        Some(Err(source)) => Err(SinkError::Csv {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(None),
    }
}
