//! This module provides utilities for loading datasets from, and saving them to, CSV files.
//!
//! A dataset file has one header row followed by one row per sample. The leading columns
//! hold the inputs and the trailing columns the targets: `dim` real-valued columns for
//! regression, or a single integer label column for classification.

use std::{io, path::Path};

use thiserror::Error;

use crate::autodiff::Float;
use crate::data::{Dataset, Target, Targets};
use crate::error::SpectrumError;

/// Represents all possible errors that can occur during data loading and parsing.
#[derive(Error, Debug)]
pub enum DataLoaderError {
    /// Wraps a standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Wraps an error of the CSV reader or writer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Occurs when a field cannot be parsed into a float.
    #[error("Parse error: failed to parse a number from '{value}' (row {row}, column {column})")]
    ParseFloat {
        row: usize,
        column: usize,
        value: String,
    },
    /// Occurs when a label field is not a non-negative integer.
    #[error("Parse error: failed to parse a class label from '{value}' (row {row})")]
    ParseLabel { row: usize, value: String },
    /// Occurs when a row does not have as many fields as the header.
    #[error("Format error: row {row} has {actual} fields, but the header has {expected}.")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
    /// Occurs when the header leaves no room for at least one input column.
    #[error("Format error: {columns} columns cannot hold {targets} target column(s) and at least one input.")]
    TooFewColumns { columns: usize, targets: usize },
    /// Occurs when the parsed values do not form a valid dataset.
    #[error("Invalid dataset: {0}")]
    Dataset(#[from] SpectrumError),
}

/// How the trailing columns of a dataset file are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSpec {
    /// The last `dim` columns are real-valued targets.
    Values { dim: usize },
    /// The last column is a class label in `0..num_classes`.
    Classes { num_classes: usize },
}

impl TargetSpec {
    fn columns(self) -> usize {
        match self {
            TargetSpec::Values { dim } => dim,
            TargetSpec::Classes { .. } => 1,
        }
    }
}

/// Reads a dataset from a CSV file with a header row.
///
/// # Arguments
/// * `path`: The path to the CSV file.
/// * `spec`: How to interpret the trailing target columns.
///
/// # Returns
/// The dataset, with input width equal to the header width minus the target columns.
pub fn load_csv_dataset<F: Float>(
    path: impl AsRef<Path>,
    spec: TargetSpec,
) -> Result<Dataset<F>, DataLoaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let columns = reader.headers()?.len();
    let target_columns = spec.columns();
    if target_columns == 0 || columns <= target_columns {
        return Err(DataLoaderError::TooFewColumns {
            columns,
            targets: target_columns,
        });
    }
    let input_dim = columns - target_columns;

    let mut inputs = Vec::new();
    let mut values = Vec::new();
    let mut labels = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        // Data rows are numbered from 1, after the header.
        let row = index + 1;
        if record.len() != columns {
            return Err(DataLoaderError::RaggedRow {
                row,
                expected: columns,
                actual: record.len(),
            });
        }
        for (column, field) in record.iter().enumerate() {
            let is_label = matches!(spec, TargetSpec::Classes { .. }) && column == input_dim;
            if is_label {
                let label = field.parse::<usize>().map_err(|_| DataLoaderError::ParseLabel {
                    row,
                    value: field.to_string(),
                })?;
                labels.push(label);
                continue;
            }
            let value = field.parse::<f64>().map_err(|_| DataLoaderError::ParseFloat {
                row,
                column,
                value: field.to_string(),
            })?;
            if column < input_dim {
                inputs.push(F::lit(value));
            } else {
                values.push(F::lit(value));
            }
        }
    }

    let targets = match spec {
        TargetSpec::Values { dim } => Targets::Values { data: values, dim },
        TargetSpec::Classes { num_classes } => Targets::Classes {
            labels,
            num_classes,
        },
    };
    Ok(Dataset::new(inputs, input_dim, targets)?)
}

/// Writes `dataset` as CSV with columns `x0.. ` followed by `y0..` or `label`.
pub fn write_csv_dataset<F: Float>(
    path: impl AsRef<Path>,
    dataset: &Dataset<F>,
) -> Result<(), DataLoaderError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<String> = (0..dataset.input_dim()).map(|i| format!("x{i}")).collect();
    match dataset.targets() {
        Targets::Values { dim, .. } => header.extend((0..*dim).map(|i| format!("y{i}"))),
        Targets::Classes { .. } => header.push("label".to_string()),
    }
    writer.write_record(&header)?;

    for i in 0..dataset.len() {
        let mut row: Vec<String> = dataset.input(i).iter().map(|x| x.to_string()).collect();
        match dataset.target(i) {
            Target::Values(y) => row.extend(y.iter().map(|v| v.to_string())),
            Target::Class(label) => row.push(label.to_string()),
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::{fs, path::PathBuf};

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hessian_lanczos_{}_{name}", std::process::id()))
    }

    #[test]
    fn classification_file_survives_a_write_and_read() {
        let mut rng = StdRng::seed_from_u64(5);
        let dataset = Dataset::<f64>::synthetic_classification(12, 3, 4, 0.2, &mut rng).unwrap();
        let path = scratch_path("classes.csv");
        write_csv_dataset(&path, &dataset).unwrap();
        let loaded: Dataset<f64> =
            load_csv_dataset(&path, TargetSpec::Classes { num_classes: 4 }).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn parses_regression_targets() {
        let path = scratch_path("values.csv");
        fs::write(&path, "a,b,t\n1, 2, 3\n4,5,6\n").unwrap();
        let loaded: Dataset<f32> = load_csv_dataset(&path, TargetSpec::Values { dim: 1 }).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.input_dim(), 2);
        assert_eq!(loaded.input(1), &[4.0, 5.0]);
        assert_eq!(loaded.target(0), Target::Values(&[3.0]));
    }

    #[test]
    fn reports_bad_rows() {
        let path = scratch_path("bad.csv");
        fs::write(&path, "a,b,label\n1,2,0\n1,x,1\n").unwrap();
        let err = load_csv_dataset::<f64>(&path, TargetSpec::Classes { num_classes: 2 }).unwrap_err();
        assert!(matches!(err, DataLoaderError::ParseFloat { row: 2, column: 1, .. }));

        fs::write(&path, "a,b,label\n1,2\n").unwrap();
        let err = load_csv_dataset::<f64>(&path, TargetSpec::Classes { num_classes: 2 }).unwrap_err();
        assert!(matches!(err, DataLoaderError::RaggedRow { row: 1, expected: 3, actual: 2 }));

        fs::write(&path, "a,b,label\n1,2,5\n").unwrap();
        let err = load_csv_dataset::<f64>(&path, TargetSpec::Classes { num_classes: 2 }).unwrap_err();
        assert!(matches!(err, DataLoaderError::Dataset(_)));
        fs::remove_file(&path).unwrap();
    }
}
