use crate::common::*;
use fnv::FnvHashMap as HashMap;
use matrix_util::mtx_io::{read_mtx, read_names};
use nalgebra_sparse::CscMatrix;

/// Raw query counts to be mapped onto a reference
#[derive(Debug, Clone)]
pub struct QueryData {
    /// `genes x cells` raw counts
    pub counts: CscMat,
    pub genes: Vec<Box<str>>,
    pub cells: Vec<Box<str>>,
    /// donor (batch) of each cell; `None` if unknown
    pub donors: Option<Vec<Box<str>>>,
}

impl QueryData {
    pub fn new(
        counts: CscMat,
        genes: Vec<Box<str>>,
        cells: Vec<Box<str>>,
        donors: Option<Vec<Box<str>>>,
    ) -> anyhow::Result<Self> {
        if counts.nrows() != genes.len() {
            return Err(anyhow::anyhow!(
                "{} count rows but {} gene names",
                counts.nrows(),
                genes.len()
            ));
        }
        if counts.ncols() != cells.len() {
            return Err(anyhow::anyhow!(
                "{} count columns but {} cell names",
                counts.ncols(),
                cells.len()
            ));
        }
        if let Some(donors) = donors.as_ref() {
            if donors.len() != cells.len() {
                return Err(anyhow::anyhow!(
                    "{} donors for {} cells",
                    donors.len(),
                    cells.len()
                ));
            }
        }
        Ok(Self {
            counts,
            genes,
            cells,
            donors,
        })
    }

    /// Read a MatrixMarket file with its row and column name files
    ///
    /// * `donor_file` - (cell, donor) pairs; otherwise donors are
    ///   inferred from `barcode@donor` cell names
    pub fn from_mtx(
        mtx_file: &str,
        row_file: &str,
        col_file: &str,
        donor_file: Option<&str>,
    ) -> anyhow::Result<Self> {
        let counts = read_mtx(mtx_file)?;
        let genes = read_names(row_file, 1)?;
        let cells = read_names(col_file, 0)?;

        info!(
            "read {} genes x {} cells from {}",
            counts.nrows(),
            counts.ncols(),
            mtx_file
        );

        let donors = match donor_file {
            Some(file) => Some(read_donor_file(file, &cells)?),
            None => infer_donors(&cells),
        };

        Self::new(counts, genes, cells, donors)
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_genes(&self) -> usize {
        self.genes.len()
    }

    /// Donor of each cell, with [`IMPLICIT_BATCH`] for unknown donors
    pub fn donor_names(&self) -> Vec<Box<str>> {
        match self.donors.as_ref() {
            Some(donors) => donors.clone(),
            None => vec![IMPLICIT_BATCH.into(); self.num_cells()],
        }
    }

    /// Keep the given cells (columns) in the given order
    pub fn subset_cells(&self, cells: &[usize]) -> anyhow::Result<Self> {
        let mut offsets = Vec::with_capacity(cells.len() + 1);
        let mut row_indices = vec![];
        let mut values = vec![];
        offsets.push(0);

        for &j in cells {
            if j >= self.num_cells() {
                return Err(anyhow::anyhow!(
                    "cell index {} out of range {}",
                    j,
                    self.num_cells()
                ));
            }
            let col = self.counts.col(j);
            row_indices.extend_from_slice(col.row_indices());
            values.extend_from_slice(col.values());
            offsets.push(row_indices.len());
        }

        let counts = CscMatrix::try_from_csc_data(
            self.num_genes(),
            cells.len(),
            offsets,
            row_indices,
            values,
        )
        .map_err(|e| anyhow::anyhow!("failed to subset cells: {}", e))?;

        Self::new(
            counts,
            self.genes.clone(),
            cells.iter().map(|&j| self.cells[j].clone()).collect(),
            self.donors
                .as_ref()
                .map(|d| cells.iter().map(|&j| d[j].clone()).collect()),
        )
    }
}

/// Donors from `barcode@donor` cell names. `None` if no name carries
/// a donor; otherwise names without `@` fall into [`IMPLICIT_BATCH`].
pub fn infer_donors(cells: &[Box<str>]) -> Option<Vec<Box<str>>> {
    if !cells.iter().any(|c| c.contains('@')) {
        info!("no donor information in cell names");
        return None;
    }

    info!("inferring donors from cell names (barcode@donor)");

    let donors: Vec<Box<str>> = cells
        .iter()
        .map(|cell| match cell.rfind('@') {
            Some(pos) => Box::from(&cell[pos + 1..]),
            None => Box::from(IMPLICIT_BATCH),
        })
        .collect();

    info!(
        "inferred {} donors",
        matrix_util::utils::unique_in_order(&donors).len()
    );
    Some(donors)
}

/// Read `cell donor` pairs (header line, tab/comma/space separated)
/// and line them up with `cells`
pub fn read_donor_file(file: &str, cells: &[Box<str>]) -> anyhow::Result<Vec<Box<str>>> {
    let parsed = read_lines_of_words_delim(file, &['\t', ',', ' '], 0)?;

    let mut cell_to_donor: HashMap<Box<str>, Box<str>> = HashMap::default();
    for words in parsed.lines {
        if words.len() < 2 {
            continue;
        }
        let mut words = words.into_iter();
        if let (Some(cell), Some(donor)) = (words.next(), words.next()) {
            cell_to_donor.insert(cell, donor);
        }
    }

    if cell_to_donor.is_empty() {
        return Err(anyhow::anyhow!("no (cell, donor) pairs in {}", file));
    }

    let mut missing = 0_usize;
    let donors: Vec<Box<str>> = cells
        .iter()
        .map(|c| {
            cell_to_donor.get(c).cloned().unwrap_or_else(|| {
                missing += 1;
                IMPLICIT_BATCH.into()
            })
        })
        .collect();

    if missing > 0 {
        warn!(
            "{} of {} cells not found in {}; assigned to '{}'",
            missing,
            cells.len(),
            file,
            IMPLICIT_BATCH
        );
    }

    Ok(donors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn names(xs: &[&str]) -> Vec<Box<str>> {
        xs.iter().map(|&x| x.into()).collect()
    }

    #[test]
    fn donors_come_from_cell_names() {
        assert!(infer_donors(&names(&["a", "b"])).is_none());

        let donors = infer_donors(&names(&["a@X", "b@Y", "c"])).unwrap_or_default();
        assert_eq!(donors, names(&["X", "Y", IMPLICIT_BATCH]));
    }

    #[test]
    fn donor_file_lines_up_with_cells() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".tsv")?;
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
        write_lines(&["cell\tdonor", "c2\tY", "c1\tX"], file)?;

        let donors = read_donor_file(file, &names(&["c1", "c2", "c3"]))?;
        assert_eq!(donors, names(&["X", "Y", IMPLICIT_BATCH]));
        Ok(())
    }

    #[test]
    fn subset_keeps_selected_columns() -> anyhow::Result<()> {
        let mut coo = CooMatrix::<f32>::new(2, 3);
        coo.push(0, 0, 1.0);
        coo.push(1, 1, 2.0);
        coo.push(0, 2, 3.0);
        coo.push(1, 2, 4.0);

        let query = QueryData::new(
            CscMat::from(&coo),
            names(&["g1", "g2"]),
            names(&["c1", "c2", "c3"]),
            Some(names(&["X", "Y", "Y"])),
        )?;

        let sub = query.subset_cells(&[2, 0])?;
        assert_eq!(sub.cells, names(&["c3", "c1"]));
        assert_eq!(sub.donors, Some(names(&["Y", "X"])));
        assert_eq!(sub.counts.col(0).values(), &[3.0, 4.0]);
        assert_eq!(sub.counts.col(1).row_indices(), &[0]);
        assert!(query.subset_cells(&[5]).is_err());
        Ok(())
    }

    #[test]
    fn mismatched_names_are_rejected() {
        let coo = CooMatrix::<f32>::new(2, 1);
        let ret = QueryData::new(CscMat::from(&coo), names(&["g1"]), names(&["c1"]), None);
        assert!(ret.is_err());
    }
}
