use std::collections::HashSet;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::AppError;

/// Per-sample feature matrix: rows are features (variant loci, genes or
/// immune cell types), columns are sample regions plus the normal column.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Where the matrix came from, used in error messages
    pub source: String,
    pub feature_ids: Vec<String>,
    pub columns: Vec<String>,
    /// Row-major, one row per feature, one value per column
    pub values: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Copy of this matrix with one named column removed
    pub fn without_column(&self, name: &str) -> Result<FeatureMatrix, AppError> {
        let idx = self.column_index(name).ok_or_else(|| {
            AppError::MalformedInput(
                self.source.clone(),
                format!("exclusion column '{}' not present", name),
            )
        })?;
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let values = self
            .values
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.remove(idx);
                row
            })
            .collect();
        Ok(FeatureMatrix {
            source: self.source.clone(),
            feature_ids: self.feature_ids.clone(),
            columns,
            values,
        })
    }
}

/// Load a tab-delimited feature matrix. The header row names the columns;
/// the first column of every line is the feature identifier and is kept
/// separately from the numeric values.
pub fn read_feature_matrix(path: &Path) -> Result<FeatureMatrix, Box<dyn Error + Send + Sync>> {
    let source = path.display().to_string();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .ok_or_else(|| AppError::MalformedInput(source.clone(), "file is empty".to_string()))??;
    let mut header_fields: Vec<String> = header.split('\t').map(|s| s.to_string()).collect();
    if header_fields.len() < 2 {
        return Err(AppError::MalformedInput(
            source,
            "header must name at least one sample column".to_string(),
        )
        .into());
    }
    // First header field labels the feature-id column and is not a sample
    header_fields.remove(0);
    let columns = header_fields;

    let mut seen: HashSet<&str> = HashSet::new();
    for col in &columns {
        if !seen.insert(col.as_str()) {
            return Err(
                AppError::MalformedInput(source, format!("duplicate column '{}'", col)).into(),
            );
        }
    }

    let mut feature_ids = Vec::new();
    let mut values: Vec<Vec<f64>> = Vec::new();
    for (line_num, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() + 1 {
            return Err(AppError::MalformedInput(
                source,
                format!(
                    "line {} has {} fields, expected {}",
                    line_num + 2,
                    fields.len(),
                    columns.len() + 1
                ),
            )
            .into());
        }
        let mut row = Vec::with_capacity(columns.len());
        for (ci, field) in fields[1..].iter().enumerate() {
            let v = field.trim().parse::<f64>().map_err(|_| {
                AppError::MalformedInput(
                    source.clone(),
                    format!(
                        "non-numeric value '{}' at line {}, column '{}'",
                        field,
                        line_num + 2,
                        columns[ci]
                    ),
                )
            })?;
            row.push(v);
        }
        feature_ids.push(fields[0].to_string());
        values.push(row);
    }

    Ok(FeatureMatrix {
        source,
        feature_ids,
        columns,
        values,
    })
}

/// Symmetric pairwise dissimilarity matrix between sample columns
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    pub labels: Vec<String>,
    /// Full square matrix, row-major
    pub values: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Pairwise mean absolute difference between columns, halved:
    /// d(i,j) = sum_r |v[r,i] - v[r,j]| / (2 * nRows).
    /// For frequency data in [0,1] this stays within [0,1].
    pub fn from_features(m: &FeatureMatrix) -> Result<DistanceMatrix, AppError> {
        let n = m.n_cols();
        let rows = m.n_rows();
        if rows == 0 {
            return Err(AppError::MalformedInput(
                m.source.clone(),
                "matrix has no feature rows".to_string(),
            ));
        }
        for (ri, row) in m.values.iter().enumerate() {
            for (ci, v) in row.iter().enumerate() {
                if !v.is_finite() {
                    return Err(AppError::MalformedInput(
                        m.source.clone(),
                        format!(
                            "non-finite value for feature '{}', column '{}'",
                            m.feature_ids[ri], m.columns[ci]
                        ),
                    ));
                }
            }
        }

        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let sum: f64 = m.values.iter().map(|row| (row[i] - row[j]).abs()).sum();
                let d = sum / (2.0 * rows as f64);
                values[i][j] = d;
                values[j][i] = d;
            }
        }
        Ok(DistanceMatrix {
            labels: m.columns.clone(),
            values,
        })
    }

    pub fn n(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// Write as a tab-delimited square table: header row of labels with a
    /// leading empty cell, then one labelled row per sample. Values use the
    /// shortest representation that parses back to the same f64.
    pub fn write_tsv(&self, path: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "\t{}", self.labels.join("\t"))?;
        for (i, label) in self.labels.iter().enumerate() {
            let row: Vec<String> = self.values[i].iter().map(|v| v.to_string()).collect();
            writeln!(out, "{}\t{}", label, row.join("\t"))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Reload a matrix written by `write_tsv`. Validates shape, label
    /// agreement between header and rows, symmetry and a zero diagonal.
    pub fn read_tsv(path: &Path) -> Result<DistanceMatrix, Box<dyn Error + Send + Sync>> {
        let source = path.display().to_string();
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header = lines.next().ok_or_else(|| {
            AppError::MalformedInput(source.clone(), "file is empty".to_string())
        })??;
        let header_fields: Vec<&str> = header.split('\t').collect();
        if header_fields.len() < 2 || !header_fields[0].is_empty() {
            return Err(AppError::MalformedInput(
                source,
                "expected a header row with a leading empty cell".to_string(),
            )
            .into());
        }
        let labels: Vec<String> = header_fields[1..].iter().map(|s| s.to_string()).collect();
        let n = labels.len();

        let mut values: Vec<Vec<f64>> = Vec::with_capacity(n);
        let mut row_labels = Vec::with_capacity(n);
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != n + 1 {
                return Err(AppError::MalformedInput(
                    source,
                    format!(
                        "line {} has {} fields, expected {}",
                        line_num + 2,
                        fields.len(),
                        n + 1
                    ),
                )
                .into());
            }
            let mut row = Vec::with_capacity(n);
            for field in &fields[1..] {
                let v = field.trim().parse::<f64>().map_err(|_| {
                    AppError::MalformedInput(
                        source.clone(),
                        format!("non-numeric value '{}' at line {}", field, line_num + 2),
                    )
                })?;
                row.push(v);
            }
            row_labels.push(fields[0].to_string());
            values.push(row);
        }

        if row_labels != labels {
            return Err(AppError::MalformedInput(
                source,
                "row labels do not match header labels".to_string(),
            )
            .into());
        }
        for i in 0..n {
            if values[i][i] != 0.0 {
                return Err(AppError::MalformedInput(
                    source,
                    format!("non-zero diagonal at '{}'", labels[i]),
                )
                .into());
            }
            for j in (i + 1)..n {
                if (values[i][j] - values[j][i]).abs() > 1e-9 {
                    return Err(AppError::MalformedInput(
                        source,
                        format!("asymmetric entries for '{}'/'{}'", labels[i], labels[j]),
                    )
                    .into());
                }
            }
        }

        Ok(DistanceMatrix { labels, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(columns: &[&str], rows: &[(&str, &[f64])]) -> FeatureMatrix {
        FeatureMatrix {
            source: "test".to_string(),
            feature_ids: rows.iter().map(|(id, _)| id.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values: rows.iter().map(|(_, v)| v.to_vec()).collect(),
        }
    }

    #[test]
    fn distance_from_two_feature_matrix() {
        // d(N,T1) = (0.2+0.1)/4, d(N,T2) = (0.4+0.3)/4, d(T1,T2) = (0.2+0.2)/4
        let m = matrix(
            &["N", "T1", "T2"],
            &[("v1", &[0.0, 0.2, 0.4]), ("v2", &[0.0, 0.1, 0.3])],
        );
        let d = DistanceMatrix::from_features(&m).unwrap();
        assert_eq!(d.labels, vec!["N", "T1", "T2"]);
        assert!((d.get(0, 1) - 0.075).abs() < 1e-12);
        assert!((d.get(0, 2) - 0.175).abs() < 1e-12);
        assert!((d.get(1, 2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn distance_is_symmetric_with_zero_diagonal() {
        let m = matrix(
            &["N", "T1", "T2", "T3"],
            &[
                ("a", &[0.1, 0.5, 0.9, 0.0]),
                ("b", &[0.2, 0.3, 0.1, 0.7]),
                ("c", &[0.0, 0.0, 0.4, 0.2]),
            ],
        );
        let d = DistanceMatrix::from_features(&m).unwrap();
        for i in 0..d.n() {
            assert_eq!(d.get(i, i), 0.0);
            for j in 0..d.n() {
                assert_eq!(d.get(i, j), d.get(j, i));
            }
        }
    }

    #[test]
    fn identical_columns_have_zero_distance() {
        let m = matrix(
            &["N", "T1", "T2"],
            &[("a", &[0.3, 0.3, 0.8]), ("b", &[0.6, 0.6, 0.1])],
        );
        let d = DistanceMatrix::from_features(&m).unwrap();
        assert_eq!(d.get(0, 1), 0.0);
        assert!(d.get(0, 2) > 0.0);
    }

    #[test]
    fn distance_scales_linearly() {
        let m = matrix(
            &["N", "T1", "T2"],
            &[("a", &[0.0, 0.2, 0.4]), ("b", &[0.0, 0.1, 0.3])],
        );
        let scaled = matrix(
            &["N", "T1", "T2"],
            &[("a", &[0.0, 0.6, 1.2]), ("b", &[0.0, 0.3, 0.9])],
        );
        let d1 = DistanceMatrix::from_features(&m).unwrap();
        let d2 = DistanceMatrix::from_features(&scaled).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert!((d2.get(i, j) - 3.0 * d1.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn single_row_matrix_is_valid() {
        let m = matrix(&["N", "T1"], &[("a", &[0.0, 0.5])]);
        let d = DistanceMatrix::from_features(&m).unwrap();
        assert!((d.get(0, 1) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn nan_value_is_rejected() {
        let m = matrix(
            &["N", "T1"],
            &[("a", &[0.0, f64::NAN]), ("b", &[0.1, 0.2])],
        );
        let err = DistanceMatrix::from_features(&m).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("non-finite"), "{}", msg);
        assert!(msg.contains("T1"), "{}", msg);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let m = matrix(&["N", "T1"], &[]);
        assert!(DistanceMatrix::from_features(&m).is_err());
    }

    #[test]
    fn without_column_drops_values() {
        let m = matrix(
            &["N", "T1", "T2"],
            &[("a", &[0.1, 0.2, 0.3]), ("b", &[0.4, 0.5, 0.6])],
        );
        let dropped = m.without_column("T1").unwrap();
        assert_eq!(dropped.columns, vec!["N", "T2"]);
        assert_eq!(dropped.values[0], vec![0.1, 0.3]);
        assert_eq!(dropped.values[1], vec![0.4, 0.6]);
        assert!(m.without_column("T9").is_err());
    }

    #[test]
    fn feature_matrix_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaf.txt");
        std::fs::write(
            &path,
            "Locus\tN\tT1\tT2\nchr1:100\t0\t0.2\t0.4\nchr2:200\t0\t0.1\t0.3\n",
        )
        .unwrap();
        let m = read_feature_matrix(&path).unwrap();
        assert_eq!(m.columns, vec!["N", "T1", "T2"]);
        assert_eq!(m.feature_ids, vec!["chr1:100", "chr2:200"]);
        assert_eq!(m.values[1], vec![0.0, 0.1, 0.3]);
    }

    #[test]
    fn ragged_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "Locus\tN\tT1\nchr1:100\t0\t0.2\t0.9\n").unwrap();
        let err = read_feature_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "Locus\tN\tT1\nchr1:100\t0\tlow\n").unwrap();
        let err = read_feature_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
        assert!(err.to_string().contains("T1"));
    }

    #[test]
    fn duplicate_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.txt");
        std::fs::write(&path, "Locus\tN\tT1\tT1\nchr1:100\t0\t0.1\t0.2\n").unwrap();
        let err = read_feature_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn distance_matrix_tsv_round_trip() {
        let m = matrix(
            &["N", "T1", "T2"],
            &[("a", &[0.0, 0.2, 0.4]), ("b", &[0.0, 0.1, 0.3])],
        );
        let d = DistanceMatrix::from_features(&m).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.txt");
        d.write_tsv(&path).unwrap();
        let reloaded = DistanceMatrix::read_tsv(&path).unwrap();
        assert_eq!(d, reloaded);
    }

    #[test]
    fn read_tsv_rejects_label_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.txt");
        std::fs::write(&path, "\tN\tT1\nN\t0\t0.1\nT9\t0.1\t0\n").unwrap();
        let err = DistanceMatrix::read_tsv(&path).unwrap_err();
        assert!(err.to_string().contains("row labels"));
    }

    #[test]
    fn read_tsv_rejects_asymmetry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.txt");
        std::fs::write(&path, "\tN\tT1\nN\t0\t0.1\nT1\t0.2\t0\n").unwrap();
        let err = DistanceMatrix::read_tsv(&path).unwrap_err();
        assert!(err.to_string().contains("asymmetric"));
    }
}
