use indicatif::ParallelProgressIterator;
use instant_distance::{Builder, HnswMap, Search};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// An approximate nearest-neighbour dictionary (HnswMap wrapper)
/// over the columns of a matrix
///
pub struct ColumnDict<T> {
    dict: HnswMap<VecPoint, T>,
    ncols: usize,
}

impl<T> ColumnDict<T>
where
    T: Clone + Send + Sync,
{
    /// Build an HNSW graph over the columns of `data`
    ///
    /// * `data` - `d x n` matrix, one point per column
    /// * `names` - value attached to each column
    /// * `seed` - random seed for the graph construction
    ///
    pub fn from_columns(data: &DMatrix<f32>, names: Vec<T>, seed: u64) -> anyhow::Result<Self> {
        let nn = data.ncols();

        if nn != names.len() {
            return Err(anyhow::anyhow!(
                "{} columns but {} names",
                nn,
                names.len()
            ));
        }

        if nn == 0 {
            return Err(anyhow::anyhow!("cannot build a dictionary of zero columns"));
        }

        let data_vec: Vec<VecPoint> = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|j| data.column(j).to_vp())
            .collect();

        let dict = Builder::default().seed(seed).build(data_vec, names);

        Ok(ColumnDict { dict, ncols: nn })
    }

    pub fn len(&self) -> usize {
        self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.ncols == 0
    }

    /// k-nearest neighbour search of an arbitrary vector
    ///
    /// * `query` - a point in the same space as the columns
    /// * `knn` - the number of nearest neighbours to return
    ///
    /// Returns names and Euclidean distances, nearest first.
    pub fn search_by_vector(&self, query: &[f32], knn: usize) -> (Vec<T>, Vec<f32>) {
        let nquery = knn.min(self.ncols);
        let query = query.to_vec().to_vp();
        let mut search = Search::default();

        self.dict
            .search(&query, &mut search)
            .take(nquery)
            .map(|item| (item.value.clone(), item.distance))
            .unzip()
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for nalgebra::DVectorView<'_, f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        crate::dmatrix_util::squared_distance(&self.data, &other.data).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_column_is_itself() -> anyhow::Result<()> {
        let data = DMatrix::from_row_slice(2, 4, &[0.0, 1.0, 5.0, 9.0, 0.0, 1.0, 5.0, 9.0]);
        let dict = ColumnDict::from_columns(&data, vec![10, 11, 12, 13], 1)?;
        assert_eq!(dict.len(), 4);

        let (names, dist) = dict.search_by_vector(&[5.1, 4.9], 2);
        assert_eq!(names[0], 12);
        assert!(dist[0] < dist[1]);

        let (names, _) = dict.search_by_vector(&[0.0, 0.0], 10);
        assert_eq!(names.len(), 4);
        Ok(())
    }
}
