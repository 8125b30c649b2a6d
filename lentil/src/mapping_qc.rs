use crate::common::*;
use crate::neighbours::Neighbour;
use matrix_util::utils::partition_by_membership;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingQcArgs {
    pub enabled: bool,
    /// number of reference neighbours to average over
    pub knn: usize,
    /// `t` in `median + t * MAD`
    pub mad_threshold: f32,
    /// threshold within each donor batch
    pub per_batch: bool,
    /// smaller batches use the global threshold
    pub min_batch_cells: usize,
    /// absolute cap on the mapping error
    pub max_error: Option<f32>,
}

impl Default for MappingQcArgs {
    fn default() -> Self {
        Self {
            enabled: true,
            knn: DEFAULT_KNN,
            mad_threshold: DEFAULT_MAD_THRESHOLD,
            per_batch: true,
            min_batch_cells: DEFAULT_MIN_BATCH_CELLS,
            max_error: None,
        }
    }
}

/// Per-cell mapping error and the outcome of thresholding it
#[derive(Debug, Clone)]
pub struct MappingQc {
    pub scores: Vec<f32>,
    pub cutoffs: Vec<f32>,
    pub pass: Vec<bool>,
}

impl MappingQc {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn num_failed(&self) -> usize {
        self.pass.iter().filter(|&&p| !p).count()
    }

    /// Score cells from their nearest reference neighbours and threshold
    ///
    /// * `neighbours` - nearest first; only the first `args.knn` are used
    /// * `batches` - donor of each cell; `None` means a single batch
    pub fn from_neighbours(
        neighbours: &[Vec<Neighbour>],
        batches: Option<&[Box<str>]>,
        args: &MappingQcArgs,
    ) -> anyhow::Result<Self> {
        let scores = mapping_error_scores(neighbours, args.knn);
        Self::from_scores(scores, batches, args)
    }

    pub fn from_scores(
        scores: Vec<f32>,
        batches: Option<&[Box<str>]>,
        args: &MappingQcArgs,
    ) -> anyhow::Result<Self> {
        let nn = scores.len();
        if let Some(batches) = batches {
            if batches.len() != nn {
                return Err(anyhow::anyhow!(
                    "{} batch labels for {} mapping scores",
                    batches.len(),
                    nn
                ));
            }
        }

        let global = robust_cutoff(&scores, args.mad_threshold);
        let mut cutoffs = vec![global; nn];

        if args.per_batch {
            if let Some(batches) = batches {
                let mut groups: Vec<_> = partition_by_membership(batches).into_iter().collect();
                groups.sort_by(|a, b| a.0.cmp(&b.0));

                for (batch, cells) in groups {
                    let batch_scores: Vec<f32> = cells.iter().map(|&i| scores[i]).collect();
                    let nfinite = batch_scores.iter().filter(|x| x.is_finite()).count();

                    if nfinite < args.min_batch_cells {
                        debug!(
                            "batch {}: {} cells, global cutoff {:.4}",
                            batch, nfinite, global
                        );
                        continue;
                    }

                    let cutoff = robust_cutoff(&batch_scores, args.mad_threshold);
                    debug!("batch {}: {} cells, cutoff {:.4}", batch, nfinite, cutoff);
                    for i in cells {
                        cutoffs[i] = cutoff;
                    }
                }
            }
        }

        let pass: Vec<bool> = if args.enabled {
            scores
                .iter()
                .zip(cutoffs.iter())
                .map(|(&s, &c)| {
                    s.is_finite() && s <= c && args.max_error.is_none_or(|m| s <= m)
                })
                .collect()
        } else {
            vec![true; nn]
        };

        let ret = Self {
            scores,
            cutoffs,
            pass,
        };

        info!(
            "mapping QC: {} of {} cells failed (global cutoff {:.4})",
            ret.num_failed(),
            nn,
            global
        );

        Ok(ret)
    }
}

/// Mean distance to the `knn` nearest reference cells; `NaN` if none
pub fn mapping_error_scores(neighbours: &[Vec<Neighbour>], knn: usize) -> Vec<f32> {
    neighbours
        .iter()
        .map(|nn_i| {
            let nn_i = &nn_i[..knn.min(nn_i.len())];
            if nn_i.is_empty() {
                f32::NAN
            } else {
                nn_i.iter().map(|n| n.distance).sum::<f32>() / nn_i.len() as f32
            }
        })
        .collect()
}

/// `median + t * MAD` over the finite values
pub fn robust_cutoff(scores: &[f32], mad_threshold: f32) -> f32 {
    let finite: Vec<f32> = scores.iter().cloned().filter(|x| x.is_finite()).collect();
    match median(&finite) {
        Some(med) => med + mad_threshold * mad(&finite, med),
        None => f32::NAN,
    }
}

/// Median of finite values; `None` if there are none
pub fn median(xs: &[f32]) -> Option<f32> {
    let mut xs: Vec<f32> = xs.iter().cloned().filter(|x| x.is_finite()).collect();
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(|a, b| a.total_cmp(b));
    let n = xs.len();
    if n % 2 == 1 {
        Some(xs[n / 2])
    } else {
        Some((xs[n / 2 - 1] + xs[n / 2]) / 2.0)
    }
}

/// Scaled median absolute deviation around `center`
pub fn mad(xs: &[f32], center: f32) -> f32 {
    let dev: Vec<f32> = xs.iter().map(|x| (x - center).abs()).collect();
    median(&dev).map(|m| MAD_SCALE * m).unwrap_or(0.0)
}
