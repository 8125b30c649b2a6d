//! Per-donor label composition of mapped cells

use crate::common::*;
use std::collections::BTreeMap;

/// Cell counts per donor and label, restricted to confidently mapped
/// cells. Donors and labels are sorted; donors without any retained
/// cell are left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub donors: Vec<Box<str>>,
    pub labels: Vec<Box<str>>,
    /// `counts[donor][label]`
    pub counts: Vec<Vec<usize>>,
}

/// One row of the long table
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionRow {
    pub donor: Box<str>,
    pub label: Box<str>,
    pub count: usize,
}

impl Composition {
    /// Count cells that pass QC, reach `confidence_cutoff` and carry a
    /// label
    ///
    /// * `labels` - final label of each cell
    /// * `donors` - donor of each cell
    /// * `pass` - mapping QC outcome of each cell
    /// * `confidence` - label confidence of each cell
    pub fn from_cells(
        labels: &[Option<Box<str>>],
        donors: &[Box<str>],
        pass: &[bool],
        confidence: &[f32],
        confidence_cutoff: f32,
    ) -> anyhow::Result<Self> {
        let nn = labels.len();
        if donors.len() != nn || pass.len() != nn || confidence.len() != nn {
            return Err(anyhow::anyhow!(
                "{} labels, {} donors, {} QC flags, {} confidence values",
                nn,
                donors.len(),
                pass.len(),
                confidence.len()
            ));
        }

        let mut table: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
        for i in 0..nn {
            let Some(label) = labels[i].as_ref() else {
                continue;
            };
            if pass[i] && confidence[i] >= confidence_cutoff {
                *table
                    .entry(donors[i].as_ref())
                    .or_default()
                    .entry(label.as_ref())
                    .or_insert(0) += 1;
            }
        }

        let mut labels: Vec<&str> = table.values().flat_map(|x| x.keys().cloned()).collect();
        labels.sort();
        labels.dedup();

        let counts: Vec<Vec<usize>> = table
            .values()
            .map(|row| {
                labels
                    .iter()
                    .map(|l| row.get(l).cloned().unwrap_or(0))
                    .collect()
            })
            .collect();

        let ret = Self {
            donors: table.keys().map(|&d| d.into()).collect(),
            labels: labels.into_iter().map(Box::from).collect(),
            counts,
        };

        info!(
            "composition: {} cells retained over {} donors and {} labels",
            ret.total(),
            ret.donors.len(),
            ret.labels.len()
        );

        Ok(ret)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|row| row.iter().sum::<usize>()).sum()
    }

    /// `(donor, label, count)` rows with a positive count
    pub fn long(&self) -> Vec<CompositionRow> {
        let mut ret = vec![];
        for (d, donor) in self.donors.iter().enumerate() {
            for (l, label) in self.labels.iter().enumerate() {
                let count = self.counts[d][l];
                if count > 0 {
                    ret.push(CompositionRow {
                        donor: donor.clone(),
                        label: label.clone(),
                        count,
                    });
                }
            }
        }
        ret
    }

    /// `donors x labels` counts
    pub fn count_matrix(&self) -> Mat {
        Mat::from_fn(self.donors.len(), self.labels.len(), |d, l| {
            self.counts[d][l] as f32
        })
    }

    /// `donors x labels` counts divided by each donor's total
    pub fn proportion_matrix(&self) -> Mat {
        let mut ret = self.count_matrix();
        for mut row in ret.row_iter_mut() {
            let tot = row.sum();
            if tot > 0.0 {
                row /= tot;
            }
        }
        ret
    }

    pub fn write_long(&self, file: &str) -> anyhow::Result<()> {
        let lines: Vec<Box<str>> = std::iter::once("donor\tlabel\tcount".into())
            .chain(
                self.long()
                    .into_iter()
                    .map(|r| format!("{}\t{}\t{}", r.donor, r.label, r.count).into_boxed_str()),
            )
            .collect();
        write_lines(&lines, file)
    }

    pub fn write_counts(&self, file: &str) -> anyhow::Result<()> {
        self.count_matrix()
            .to_tsv_with_names(file, &self.donors, &self.labels, "donor")
    }

    pub fn write_proportions(&self, file: &str) -> anyhow::Result<()> {
        self.proportion_matrix()
            .to_tsv_with_names(file, &self.donors, &self.labels, "donor")
    }

    /// Write `{hdr}.long.tsv.gz`, `{hdr}.counts.tsv.gz` and
    /// `{hdr}.proportions.tsv.gz`
    pub fn write_all(&self, hdr: &str) -> anyhow::Result<()> {
        self.write_long(&format!("{}.long.tsv.gz", hdr))?;
        self.write_counts(&format!("{}.counts.tsv.gz", hdr))?;
        self.write_proportions(&format!("{}.proportions.tsv.gz", hdr))?;
        info!("wrote composition tables {}.*.tsv.gz", hdr);
        Ok(())
    }
}
