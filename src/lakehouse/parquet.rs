use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::LakehouseError;
use crate::lakehouse::batch::{append_batch, frame_to_batch};
use crate::lakehouse::{Frame, Lakehouse};

/// Writes every table as Parquet, one directory per table:
/// `<root>/<table>/part-00000.parquet`.
#[derive(Debug, Clone)]
pub struct ParquetLakehouse {
    root: Utf8PathBuf,
    compression: Compression,
}

impl ParquetLakehouse {
    /// A lakehouse under `root` writing Snappy-compressed parts.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: Compression::SNAPPY,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn table_dir(&self, table: &str) -> Result<Utf8PathBuf, LakehouseError> {
        super::check_table(table)?;
        Ok(self.root.join(table))
    }
}

impl Lakehouse for ParquetLakehouse {
    fn persist(&self, table: &str, frame: &Frame) -> Result<(), LakehouseError> {
        let dir = self.table_dir(table)?;
        let batch = frame_to_batch(frame)?;
        let dir = super::reset_dir(dir)?;
        let path = dir.join("part-00000.parquet");
        let file = File::create(&path)?;

        if let Some(batch) = batch {
            let props = WriterProperties::builder()
                .set_compression(self.compression)
                .build();

            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
        }

        tracing::info!(table, %path, rows = frame.len(), "wrote parquet table");
        Ok(())
    }

    fn read(&self, table: &str) -> Result<Frame, LakehouseError> {
        let mut frame = None;

        for path in super::parts(&self.table_dir(table)?, table, "parquet")? {
            if super::is_blank(&path)? {
                frame.get_or_insert_with(Frame::default);
                continue;
            }

            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
            let schema = builder.schema().clone();

            for batch in builder.build()? {
                append_batch(&mut frame, &batch?)?;
            }

            if frame.is_none() {
                frame = Some(Frame::new(schema.fields().iter().map(|field| field.name().as_str())));
            }
        }

        frame.ok_or_else(|| LakehouseError::TableNotFound(table.to_string()))
    }
}
