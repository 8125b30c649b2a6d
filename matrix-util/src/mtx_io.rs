use crate::common_io::*;
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};
use std::io::Write;

/// Write a sparse matrix into a MatrixMarket file with 1-based indices
/// * `mat` - the sparse matrix to write
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx(mat: &CscMatrix<f32>, mtx_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", mat.nrows(), mat.ncols(), mat.nnz())?;

    for (row, col, val) in mat.triplet_iter() {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file into a column-compressed matrix.
/// Duplicate entries are summed.
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx(mtx_file: &str) -> anyhow::Result<CscMatrix<f32>> {
    let ReadLinesOut { lines, header } = read_lines_of_words(mtx_file, 0)?;

    if header.len() != 3 {
        return Err(anyhow::anyhow!(
            "failed to parse mtx header in {}",
            mtx_file
        ));
    }

    let nrow = header[0].parse::<usize>()?;
    let ncol = header[1].parse::<usize>()?;
    let nnz = header[2].parse::<usize>()?;

    let mut coo = CooMatrix::<f32>::new(nrow, ncol);

    for triplet in lines.iter() {
        if triplet.len() != 3 {
            return Err(anyhow::anyhow!("invalid mtx line: {:?}", triplet));
        }
        // convert 1-based to 0-based
        let row = triplet[0].parse::<usize>()?;
        let col = triplet[1].parse::<usize>()?;
        let val = triplet[2].parse::<f32>()?;

        if row == 0 || col == 0 || row > nrow || col > ncol {
            return Err(anyhow::anyhow!(
                "entry ({}, {}) out of bounds [{} x {}]",
                row,
                col,
                nrow,
                ncol
            ));
        }
        coo.push(row - 1, col - 1, val);
    }

    if coo.nnz() != nnz {
        log::warn!(
            "{}: header says {} non-zeros, found {}",
            mtx_file,
            nnz,
            coo.nnz()
        );
    }

    Ok(CscMatrix::from(&coo))
}

/// Read row or column names, one per line.
/// * `file` - names file (e.g., "features.tsv.gz")
/// * `column` - which tab/space-separated word to take (0-based)
pub fn read_names(file: &str, column: usize) -> anyhow::Result<Vec<Box<str>>> {
    let ReadLinesOut { lines, .. } = read_lines_of_words_delim(file, &['\t', ' ', ','], -1)?;

    lines
        .into_iter()
        .map(|words| {
            words
                .get(column)
                .or(words.first())
                .cloned()
                .ok_or(anyhow::anyhow!("empty line in {}", file))
        })
        .collect()
}
