use matrix_util::dmatrix_util::squared_distance;
use matrix_util::knn_match::*;
use matrix_util::traits::SampleOps;
use nalgebra::DMatrix;

#[test]
fn hnsw_agrees_with_exact_search_on_small_data() -> anyhow::Result<()> {
    let data = DMatrix::<f32>::rnorm_seeded(5, 200, 11);
    let names: Vec<usize> = (0..data.ncols()).collect();
    let dict = ColumnDict::from_columns(&data, names, 3)?;

    let query = DMatrix::<f32>::rnorm_seeded(5, 10, 12);

    for q in query.column_iter() {
        let q: Vec<f32> = q.iter().cloned().collect();
        let (found, dist) = dict.search_by_vector(&q, 1);

        let exact = data
            .column_iter()
            .map(|c| squared_distance(c.as_slice(), &q))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(j, _)| j);

        assert_eq!(Some(found[0]), exact);
        assert!(dist[0] >= 0.0);
    }
    Ok(())
}

#[test]
fn empty_dictionary_is_an_error() {
    let data = DMatrix::<f32>::zeros(3, 0);
    assert!(ColumnDict::<usize>::from_columns(&data, vec![], 0).is_err());
}
