use lentil::build_reference::*;
use lentil::common::*;
use lentil::pipeline::*;
use lentil::query::QueryData;
use lentil::reference::*;
use matrix_util::mtx_io::write_mtx;
use nalgebra_sparse::CooMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};

const NUM_GROUPS: usize = 3;
const GENES_PER_GROUP: usize = 10;
const CELLS_PER_GROUP: usize = 30;

/// Poisson counts where each group of cells over-expresses its own
/// block of genes
fn simulate_counts(seed: u64) -> anyhow::Result<CscMat> {
    let mut rng = StdRng::seed_from_u64(seed);
    let high = Poisson::new(20.0_f32)?;
    let low = Poisson::new(1.0_f32)?;

    let gg = NUM_GROUPS * GENES_PER_GROUP;
    let nn = NUM_GROUPS * CELLS_PER_GROUP;
    let mut coo = CooMatrix::<f32>::new(gg, nn);

    for j in 0..nn {
        let k = j / CELLS_PER_GROUP;
        for g in 0..gg {
            let c = if g / GENES_PER_GROUP == k {
                high.sample(&mut rng)
            } else {
                low.sample(&mut rng)
            };
            if c > 0.0 {
                coo.push(g, j, c);
            }
        }
    }
    Ok(CscMat::from(&coo))
}

fn genes() -> Vec<Box<str>> {
    (0..NUM_GROUPS * GENES_PER_GROUP)
        .map(|g| format!("gene{}", g).into_boxed_str())
        .collect()
}

fn cells(prefix: &str) -> Vec<Box<str>> {
    (0..NUM_GROUPS * CELLS_PER_GROUP)
        .map(|j| format!("{}{}", prefix, j).into_boxed_str())
        .collect()
}

fn group_labels() -> Vec<Option<Box<str>>> {
    (0..NUM_GROUPS * CELLS_PER_GROUP)
        .map(|j| Some(format!("type{}", j / CELLS_PER_GROUP).into_boxed_str()))
        .collect()
}

fn build_args() -> BuildReferenceArgs {
    BuildReferenceArgs {
        name: "simulated".into(),
        dim: 5,
        num_clusters: NUM_GROUPS,
        ..Default::default()
    }
}

#[test]
fn built_reference_labels_fresh_cells_of_the_same_groups() -> anyhow::Result<()> {
    let nn = NUM_GROUPS * CELLS_PER_GROUP;
    let atlas = build_reference(
        ReferenceInput {
            counts: simulate_counts(1)?,
            genes: genes(),
            cells: cells("r"),
            donors: vec!["ref".into(); nn],
            labels: vec![LabelColumn::categorical(CELL_TYPE, group_labels())],
            embedding: None,
            viz: None,
        },
        &build_args(),
    )?;

    assert_eq!(atlas.dim(), 5);
    assert_eq!(atlas.num_cells(), nn);
    assert!(atlas.num_clusters() >= 1 && atlas.num_clusters() <= NUM_GROUPS);

    // a fresh sample with the query genes in a different order
    let counts = simulate_counts(2)?;
    let mut query_genes = genes();
    query_genes.reverse();
    let mut coo = CooMatrix::<f32>::new(counts.nrows(), counts.ncols());
    for (g, j, &c) in counts.triplet_iter() {
        coo.push(counts.nrows() - 1 - g, j, c);
    }
    let query = QueryData::new(CscMat::from(&coo), query_genes, cells("q"), None)?;

    let mapping = map_query(&query, &atlas, &MappingParams::default())?;
    let ct = mapping
        .labels
        .categorical(CELL_TYPE)
        .ok_or(anyhow::anyhow!("no cell_type"))?;

    let truth = group_labels();
    let correct = ct
        .initial
        .iter()
        .zip(truth.iter())
        .filter(|(a, b)| a == b)
        .count();
    assert!(correct as f32 >= 0.9 * nn as f32, "{} of {} correct", correct, nn);
    Ok(())
}

#[test]
fn bundle_round_trip_keeps_the_mapping() -> anyhow::Result<()> {
    let nn = NUM_GROUPS * CELLS_PER_GROUP;
    let counts = simulate_counts(3)?;

    let atlas = build_reference(
        ReferenceInput {
            counts: counts.clone(),
            genes: genes(),
            cells: cells("r"),
            donors: vec!["ref".into(); nn],
            labels: vec![LabelColumn::categorical(CELL_TYPE, group_labels())],
            embedding: None,
            viz: None,
        },
        &build_args(),
    )?;

    let dir = tempfile::tempdir()?;
    let bundle = dir.path().join("ref.json.gz");
    let bundle = bundle.to_str().ok_or(anyhow::anyhow!("path"))?;
    atlas.save(bundle)?;
    let loaded = ReferenceAtlas::load(bundle)?;

    let query = QueryData::new(counts, genes(), cells("q"), None)?;
    let params = MappingParams::default();
    let before = map_query(&query, &atlas, &params)?;
    let after = map_query(&query, &loaded, &params)?;

    approx::assert_abs_diff_eq!(
        before.projection.embedding,
        after.projection.embedding,
        epsilon = 1e-5
    );
    assert_eq!(before.qc.pass, after.qc.pass);

    // reference cells are their own nearest neighbours
    let index = lentil::neighbours::ReferenceIndex::new(
        loaded.embedding(),
        params.metric,
        params.search,
    )?;
    for j in 0..nn {
        let nearest = index.search(after.projection.embedding.column(j).as_slice(), 1);
        assert!(nearest[0].distance < 1e-3);
    }
    Ok(())
}

#[test]
fn query_files_are_read_with_inferred_donors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = |f: &str| -> anyhow::Result<String> {
        dir.path()
            .join(f)
            .to_str()
            .map(|s| s.to_string())
            .ok_or(anyhow::anyhow!("path"))
    };

    let counts = simulate_counts(4)?;
    let cell_names: Vec<Box<str>> = (0..counts.ncols())
        .map(|j| format!("c{}@{}", j, if j % 2 == 0 { "X" } else { "Y" }).into_boxed_str())
        .collect();

    write_mtx(&counts, &path("q.mtx.gz")?)?;
    write_lines(&genes(), &path("q.rows.gz")?)?;
    write_lines(&cell_names, &path("q.cols.gz")?)?;

    let query = QueryData::from_mtx(&path("q.mtx.gz")?, &path("q.rows.gz")?, &path("q.cols.gz")?, None)?;

    assert_eq!(query.num_genes(), NUM_GROUPS * GENES_PER_GROUP);
    assert_eq!(query.counts.nnz(), counts.nnz());
    let donors = query.donors.ok_or(anyhow::anyhow!("no donors"))?;
    assert_eq!(donors[0].as_ref(), "X");
    assert_eq!(donors[1].as_ref(), "Y");
    Ok(())
}

#[test]
fn external_embedding_maps_queries_into_its_own_basis() -> anyhow::Result<()> {
    let nn = NUM_GROUPS * CELLS_PER_GROUP;
    let input = |embedding: Option<Mat>| -> anyhow::Result<ReferenceInput> {
        Ok(ReferenceInput {
            counts: simulate_counts(5)?,
            genes: genes(),
            cells: cells("r"),
            donors: vec!["ref".into(); nn],
            labels: vec![LabelColumn::categorical(CELL_TYPE, group_labels())],
            embedding,
            viz: None,
        })
    };

    let base = build_reference(input(None)?, &build_args())?;

    // the same cells in a sign-flipped basis fitted elsewhere
    let flipped = -base.embedding().clone();
    let atlas = build_reference(input(Some(flipped.clone()))?, &build_args())?;
    assert_eq!(atlas.embedding(), &flipped);

    let query = QueryData::new(simulate_counts(6)?, genes(), cells("q"), None)?;
    let params = MappingParams {
        projection: lentil::projection::ProjectionArgs {
            correct_batch: false,
            ..Default::default()
        },
        ..Default::default()
    };

    let base_mapping = map_query(&query, &base, &params)?;
    let mapping = map_query(&query, &atlas, &params)?;

    approx::assert_abs_diff_eq!(
        mapping.projection.embedding,
        -base_mapping.projection.embedding,
        epsilon = 1e-2
    );

    let ct = mapping
        .labels
        .categorical(CELL_TYPE)
        .ok_or(anyhow::anyhow!("no cell_type"))?;
    let truth = group_labels();
    let correct = ct
        .initial
        .iter()
        .zip(truth.iter())
        .filter(|(a, b)| a == b)
        .count();
    assert!(correct as f32 >= 0.9 * nn as f32, "{} of {} correct", correct, nn);
    Ok(())
}
