use crate::common_io::{read_lines_of_words_delim, write_lines, ReadLinesOut};
use crate::parquet::{read_named_columns, write_named_columns, NamedColumns};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

fn check_names(mat: &DMatrix<f32>, rows: &[Box<str>], cols: &[Box<str>]) -> anyhow::Result<()> {
    if mat.nrows() != rows.len() || mat.ncols() != cols.len() {
        return Err(anyhow::anyhow!(
            "names [{} x {}] don't match the matrix [{} x {}]",
            rows.len(),
            cols.len(),
            mat.nrows(),
            mat.ncols()
        ));
    }
    Ok(())
}

impl IoOps for DMatrix<f32> {
    type Scalar = f32;
    type Mat = Self;

    fn to_tsv_with_names(
        &self,
        tsv_file: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
        row_column: &str,
    ) -> anyhow::Result<()> {
        check_names(self, rows, cols)?;

        // par_iter() or par_bridge() will
        // mess up the order of the rows
        let mut lines = Vec::with_capacity(self.nrows() + 1);
        let hdr = std::iter::once(row_column.to_string())
            .chain(cols.iter().map(|c| c.to_string()))
            .collect::<Vec<_>>()
            .join("\t");
        lines.push(hdr.into_boxed_str());

        for (name, row) in rows.iter().zip(self.row_iter()) {
            let line = std::iter::once(name.to_string())
                .chain(row.iter().map(|x| format!("{}", x)))
                .collect::<Vec<_>>()
                .join("\t");
            lines.push(line.into_boxed_str());
        }

        write_lines(&lines, tsv_file)
    }

    fn from_tsv_with_names(tsv_file: &str) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let ReadLinesOut { lines, header } = read_lines_of_words_delim(tsv_file, "\t", 0)?;

        if header.is_empty() {
            return Err(anyhow::anyhow!("no header in {}", tsv_file));
        }

        let cols: Vec<Box<str>> = header[1..].to_vec();
        let ncols = cols.len();
        let mut rows = Vec::with_capacity(lines.len());
        let mut data = Vec::with_capacity(lines.len() * ncols);

        for words in lines {
            if words.len() != ncols + 1 {
                return Err(anyhow::anyhow!(
                    "expected {} fields, found {} in {}",
                    ncols + 1,
                    words.len(),
                    tsv_file
                ));
            }
            rows.push(words[0].clone());
            for w in &words[1..] {
                data.push(parse_value(w)?);
            }
        }

        let mat = DMatrix::<f32>::from_row_iterator(rows.len(), ncols, data);
        Ok(MatWithNames { rows, cols, mat })
    }

    fn to_parquet_with_names(
        &self,
        file_path: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
        row_column: &str,
    ) -> anyhow::Result<()> {
        check_names(self, rows, cols)?;

        let table = NamedColumns {
            row_names: rows.to_vec(),
            column_names: cols.to_vec(),
            columns: self
                .column_iter()
                .map(|c| c.iter().map(|&x| x as f64).collect())
                .collect(),
        };

        write_named_columns(file_path, &table, Some(row_column))
    }

    fn from_parquet_with_names(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let NamedColumns {
            row_names,
            column_names,
            columns,
        } = read_named_columns(file_path)?;

        let nrows = row_names.len();
        let ncols = column_names.len();
        let mat = DMatrix::<f32>::from_fn(nrows, ncols, |i, j| columns[j][i] as f32);

        Ok(MatWithNames {
            rows: row_names,
            cols: column_names,
            mat,
        })
    }
}

/// `NA`/`NaN`/empty become `f32::NAN`
pub fn parse_value(word: &str) -> anyhow::Result<f32> {
    match word {
        "" | "NA" | "na" | "NaN" | "nan" => Ok(f32::NAN),
        _ => word
            .parse::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to parse '{}': {}", word, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_io::create_temp_dir_file;
    use approx::assert_abs_diff_eq;

    fn names(prefix: &str, n: usize) -> Vec<Box<str>> {
        (0..n).map(|i| format!("{}{}", prefix, i).into_boxed_str()).collect()
    }

    #[test]
    fn tsv_with_names() -> anyhow::Result<()> {
        let xx = DMatrix::<f32>::runif(7, 3);
        let file = create_temp_dir_file(".tsv.gz")?;
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

        xx.to_tsv_with_names(file, &names("cell", 7), &names("dim", 3), "cell")?;
        let yy = DMatrix::<f32>::from_tsv_with_names(file)?;

        assert_eq!(yy.rows, names("cell", 7));
        assert_eq!(yy.cols, names("dim", 3));
        assert_abs_diff_eq!(xx, yy.mat, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn parquet_with_names() -> anyhow::Result<()> {
        let xx = DMatrix::<f32>::runif(11, 4);
        let file = create_temp_dir_file(".parquet")?;
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

        xx.to_parquet_with_names(file, &names("c", 11), &names("d", 4), "cell")?;
        let yy = DMatrix::<f32>::from_parquet_with_names(file)?;

        assert_eq!(yy.rows, names("c", 11));
        assert_eq!(yy.cols, names("d", 4));
        assert_abs_diff_eq!(xx, yy.mat, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn mismatched_names_fail() {
        let xx = DMatrix::<f32>::zeros(2, 2);
        assert!(xx
            .to_tsv_with_names("stdout", &names("r", 3), &names("c", 2), "row")
            .is_err());
    }
}
