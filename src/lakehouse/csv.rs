use std::fs::File;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::LakehouseError;
use crate::lakehouse::batch::{append_batch, frame_to_batch};
use crate::lakehouse::{Frame, Lakehouse};

/// Writes every table as CSV with a header row, one directory per table:
/// `<root>/<table>/part-00000.csv`.
///
/// Reading infers column types from the data, so a table written from
/// integers reads back as integers.
#[derive(Debug, Clone)]
pub struct CsvLakehouse {
    root: Utf8PathBuf,
}

impl CsvLakehouse {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding the parts of `table`.
    pub fn table_dir(&self, table: &str) -> Result<Utf8PathBuf, LakehouseError> {
        super::check_table(table)?;
        Ok(self.root.join(table))
    }
}

impl Lakehouse for CsvLakehouse {
    fn persist(&self, table: &str, frame: &Frame) -> Result<(), LakehouseError> {
        let dir = self.table_dir(table)?;
        let batch = frame_to_batch(frame)?;
        let dir = super::reset_dir(dir)?;
        let path = dir.join("part-00000.csv");
        let file = File::create(&path)?;

        if let Some(batch) = batch {
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            writer.write(&batch)?;
        }

        tracing::info!(table, %path, rows = frame.len(), "wrote csv table");
        Ok(())
    }

    fn read(&self, table: &str) -> Result<Frame, LakehouseError> {
        let mut frame = None;

        for path in super::parts(&self.table_dir(table)?, table, "csv")? {
            if super::is_blank(&path)? {
                frame.get_or_insert_with(Frame::default);
                continue;
            }

            let (schema, _) = Format::default()
                .with_header(true)
                .infer_schema(File::open(&path)?, None)?;
            let schema = Arc::new(schema);

            let reader = ReaderBuilder::new(schema.clone())
                .with_header(true)
                .build(File::open(&path)?)?;

            for batch in reader {
                append_batch(&mut frame, &batch?)?;
            }

            // A part holding only a header still defines the columns.
            if frame.is_none() {
                frame = Some(Frame::new(schema.fields().iter().map(|field| field.name().as_str())));
            }
        }

        frame.ok_or_else(|| LakehouseError::TableNotFound(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lakehouse::Value;
    use crate::row;

    #[test]
    fn test_round_trip_infers_types() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let lakehouse = CsvLakehouse::new(root.clone());

        let frame = Frame::from_rows([
            row! { "num" => 1, "name" => "one", "ratio" => 0.5 },
            row! { "num" => 2, "name" => "two", "ratio" => 1.5 },
        ])
        .unwrap();

        lakehouse.persist("numbers", &frame).unwrap();
        assert!(root.join("numbers").join("part-00000.csv").is_file());

        let read = lakehouse.read("numbers").unwrap();
        assert_eq!(read, frame);
        assert_eq!(read.rows()[0].get("num"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_persist_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let lakehouse = CsvLakehouse::new(Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap());

        let first = Frame::from_rows([row! { "num" => 1 }, row! { "num" => 2 }]).unwrap();
        let second = Frame::from_rows([row! { "num" => 3 }]).unwrap();

        lakehouse.persist("numbers", &first).unwrap();
        lakehouse.persist("numbers", &second).unwrap();

        assert_eq!(lakehouse.read("numbers").unwrap(), second);
    }

    #[test]
    fn test_invalid_names_leave_root_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let lakehouse = CsvLakehouse::new(root.join("lake"));

        let frame = Frame::from_rows([row! { "num" => 1 }]).unwrap();
        lakehouse.persist("numbers", &frame).unwrap();

        for name in ["", "..", "a/b"] {
            let err = lakehouse.persist(name, &frame).unwrap_err();
            assert!(matches!(err, LakehouseError::InvalidTableName(_)));
        }

        assert_eq!(lakehouse.read("numbers").unwrap(), frame);
        assert!(matches!(lakehouse.read(".."), Err(LakehouseError::InvalidTableName(_))));
    }

    #[test]
    fn test_empty_tables() {
        let dir = tempfile::tempdir().unwrap();
        let lakehouse = CsvLakehouse::new(Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap());

        lakehouse.persist("blank", &Frame::default()).unwrap();
        assert_eq!(lakehouse.read("blank").unwrap(), Frame::default());

        let headers = Frame::new(["num", "name"]);
        lakehouse.persist("headers", &headers).unwrap();
        assert_eq!(lakehouse.read("headers").unwrap(), headers);
    }

    #[test]
    fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let lakehouse = CsvLakehouse::new(Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap());

        let err = lakehouse.read("nope").unwrap_err();
        assert!(matches!(err, LakehouseError::TableNotFound(name) if name == "nope"));
    }
}
