use crate::errors::ModelError;
use crate::input::NameRow;
use csv::WriterBuilder as CsvWriterBuilder;
use nalgebra::DMatrix;
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub trait Output: Debug {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write>;
    /// Whether this output can be considered a no-op and therefore that any code that only writes to the output can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Writes each location key as a file of that name in one directory.
#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
}

impl FileOutput {
    pub fn new(directory_path: PathBuf) -> Self {
        Self { directory_path }
    }
}

impl Output for FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        Ok(BufWriter::new(File::create(
            self.directory_path.join(location_key),
        )?))
    }
}

impl Output for &FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        <FileOutput as Output>::writer_for_location_key(self, location_key)
    }
}

/// An output that goes to nowhere/ a "sink"/ /dev/null.
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
        Ok(io::sink())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Writes a square table as CSV with a region/name/code label prefix on each
/// row and the primary codes as column headings.
pub fn write_matrix_csv(
    output: &impl Output,
    location_key: &str,
    matrix: &DMatrix<f64>,
    labels: &[NameRow],
) -> anyhow::Result<()> {
    if output.is_noop() {
        return Ok(());
    }
    if labels.len() != matrix.nrows() {
        return Err(ModelError::shape_mismatch(
            "write_matrix_csv",
            format!(
                "{} labels for a {}x{} matrix",
                labels.len(),
                matrix.nrows(),
                matrix.ncols()
            ),
        )
        .into());
    }
    let writer = output.writer_for_location_key(location_key)?;
    let mut writer = CsvWriterBuilder::new().flexible(true).from_writer(writer);

    let mut headings: Vec<String> = vec!["Country code".into(), "Name".into(), "Code".into()];
    headings.extend(labels.iter().map(|label| label.code_primary.clone()));
    writer.write_record(&headings)?;

    for (i, label) in labels.iter().enumerate() {
        let mut row: Vec<String> = vec![
            label.region.clone(),
            label.name.clone(),
            label.code_primary.clone(),
        ];
        row.extend((0..matrix.ncols()).map(|j| matrix[(i, j)].to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Test double collecting everything written through the trait.
    #[derive(Clone, Debug, Default)]
    struct BufferOutput(Rc<RefCell<Vec<u8>>>);

    struct BufferWriter(Rc<RefCell<Vec<u8>>>);

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Output for BufferOutput {
        fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
            Ok(BufferWriter(self.0.clone()))
        }
    }

    fn label(region: &str, name: &str, code: &str) -> NameRow {
        NameRow {
            region: region.into(),
            name: name.into(),
            code_primary: code.into(),
            code_secondary: format!("C_{code}"),
            unit: None,
        }
    }

    #[rstest]
    fn should_write_labelled_matrix_rows() {
        let matrix = dmatrix![1.0, 2.0; 3.0, 4.0];
        let labels = [label("NL", "Wheat", "p01"), label("NL", "Power", "p40")];
        let output = BufferOutput::default();
        write_matrix_csv(&output, "iot.csv", &matrix, &labels).unwrap();
        let written = String::from_utf8(output.0.borrow().clone()).unwrap();
        assert_eq!(
            written,
            "Country code,Name,Code,p01,p40\nNL,Wheat,p01,1,2\nNL,Power,p40,3,4\n"
        );
    }

    #[rstest]
    fn should_skip_writing_for_noop_output() {
        let matrix = dmatrix![1.0];
        let labels = [label("GLO", "Market", "m01")];
        assert!(write_matrix_csv(&SinkOutput, "iot.csv", &matrix, &labels).is_ok());
    }
}
