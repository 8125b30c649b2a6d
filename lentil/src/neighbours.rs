use crate::common::*;
use indicatif::ParallelProgressIterator;
use matrix_util::dmatrix_util::{cosine_distance, squared_distance};
use matrix_util::knn_match::ColumnDict;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Distance between embedded cells
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Euclidean,
    /// `1 - cos(x, y)`
    Cosine,
}

/// How to look up nearest neighbours
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// brute force; deterministic with ties broken by reference index
    Exact,
    /// approximate HNSW graph
    Hnsw,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour {
    /// column of the reference embedding
    pub index: usize,
    pub distance: f32,
}

/// Nearest-neighbour lookup against the reference embedding
pub struct ReferenceIndex {
    /// `D x N`, unit columns under the cosine metric
    points: Mat,
    metric: Metric,
    hnsw: Option<ColumnDict<usize>>,
}

const HNSW_SEED: u64 = 42;

impl ReferenceIndex {
    /// * `embedding` - `D x N` reference embedding, one cell per column
    pub fn new(embedding: &Mat, metric: Metric, mode: SearchMode) -> anyhow::Result<Self> {
        if embedding.ncols() == 0 {
            return Err(anyhow::anyhow!("no reference cells to search"));
        }

        let points = match metric {
            Metric::Euclidean => embedding.clone(),
            Metric::Cosine => embedding.normalize_columns(),
        };

        let hnsw = match mode {
            SearchMode::Exact => None,
            SearchMode::Hnsw => {
                info!("building HNSW over {} reference cells", points.ncols());
                let names = (0..points.ncols()).collect();
                Some(ColumnDict::from_columns(&points, names, HNSW_SEED)?)
            }
        };

        Ok(Self {
            points,
            metric,
            hnsw,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn num_points(&self) -> usize {
        self.points.ncols()
    }

    pub fn dim(&self) -> usize {
        self.points.nrows()
    }

    /// Up to `knn` nearest reference cells, nearest first
    pub fn search(&self, query: &[f32], knn: usize) -> Vec<Neighbour> {
        let knn = knn.min(self.num_points());
        if knn == 0 || query.len() != self.dim() {
            return vec![];
        }

        let query = match self.metric {
            Metric::Euclidean => query.to_vec(),
            Metric::Cosine => {
                let norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    query.iter().map(|x| x / norm).collect()
                } else {
                    vec![0.0; query.len()]
                }
            }
        };

        let zero_query = query.iter().all(|&x| x == 0.0);

        match (&self.hnsw, self.metric) {
            (Some(dict), Metric::Cosine) if !zero_query => {
                let (indices, dist) = dict.search_by_vector(&query, knn);
                indices
                    .into_iter()
                    .zip(dist)
                    .map(|(index, d)| Neighbour {
                        index,
                        distance: d * d / 2.0,
                    })
                    .collect()
            }
            (Some(dict), Metric::Euclidean) => {
                let (indices, dist) = dict.search_by_vector(&query, knn);
                indices
                    .into_iter()
                    .zip(dist)
                    .map(|(index, distance)| Neighbour { index, distance })
                    .collect()
            }
            _ => self.search_exact(&query, knn),
        }
    }

    fn distance_to(&self, query: &[f32], j: usize) -> f32 {
        let y = self.points.column(j);
        match self.metric {
            Metric::Euclidean => squared_distance(query, y.as_slice()).sqrt(),
            Metric::Cosine => cosine_distance(query, y.as_slice()),
        }
    }

    fn search_exact(&self, query: &[f32], knn: usize) -> Vec<Neighbour> {
        let mut candidates: Vec<Neighbour> = (0..self.num_points())
            .map(|j| Neighbour {
                index: j,
                distance: self.distance_to(query, j),
            })
            .collect();

        let by_distance_then_index = |a: &Neighbour, b: &Neighbour| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.index.cmp(&b.index))
        };

        if knn < candidates.len() {
            candidates.select_nth_unstable_by(knn - 1, by_distance_then_index);
            candidates.truncate(knn);
        }
        candidates.sort_by(by_distance_then_index);
        candidates
    }

    /// Search neighbours of every column of `query_dn`
    pub fn search_columns(&self, query_dn: &Mat, knn: usize) -> Vec<Vec<Neighbour>> {
        let nn = query_dn.ncols();
        (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|j| self.search(query_dn.column(j).as_slice(), knn))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line_points() -> Mat {
        // 0, 1, 2, 3, 3 on a line
        Mat::from_row_slice(2, 5, &[0.0, 1.0, 2.0, 3.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn exact_search_breaks_ties_by_index() -> anyhow::Result<()> {
        let index = ReferenceIndex::new(&line_points(), Metric::Euclidean, SearchMode::Exact)?;
        let nn = index.search(&[3.0, 0.0], 3);
        let found: Vec<usize> = nn.iter().map(|n| n.index).collect();
        assert_eq!(found, vec![3, 4, 2]);
        assert_abs_diff_eq!(nn[2].distance, 1.0);
        Ok(())
    }

    #[test]
    fn too_many_neighbours_are_capped() -> anyhow::Result<()> {
        let index = ReferenceIndex::new(&line_points(), Metric::Euclidean, SearchMode::Exact)?;
        assert_eq!(index.search(&[0.0, 0.0], 30).len(), 5);
        assert!(index.search(&[0.0], 3).is_empty());
        Ok(())
    }

    #[test]
    fn cosine_distance_ignores_scale() -> anyhow::Result<()> {
        let pts = Mat::from_row_slice(2, 3, &[1.0, 0.0, -5.0, 0.0, 2.0, 0.0]);
        let index = ReferenceIndex::new(&pts, Metric::Cosine, SearchMode::Exact)?;
        let nn = index.search(&[10.0, 0.0], 3);
        assert_eq!(nn[0].index, 0);
        assert_abs_diff_eq!(nn[0].distance, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(nn[1].distance, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(nn[2].distance, 2.0, epsilon = 1e-6);

        let zero = index.search(&[0.0, 0.0], 2);
        assert!(zero.iter().all(|n| n.distance == 1.0));
        Ok(())
    }

    #[test]
    fn hnsw_finds_the_obvious_neighbour() -> anyhow::Result<()> {
        let index = ReferenceIndex::new(&line_points(), Metric::Euclidean, SearchMode::Hnsw)?;
        let nn = index.search(&[1.1, 0.0], 1);
        assert_eq!(nn[0].index, 1);

        let index = ReferenceIndex::new(&line_points(), Metric::Cosine, SearchMode::Hnsw)?;
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
        Ok(())
    }
}
