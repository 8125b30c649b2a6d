//! Mapping a query onto one reference, and the broad-then-focused
//! two-stage flow built from it

use crate::common::*;
use crate::composition::Composition;
use crate::label_transfer::*;
use crate::mapping_qc::*;
use crate::neighbours::*;
use crate::projection::*;
use crate::query::QueryData;
use crate::reference::ReferenceAtlas;
use serde::{Deserialize, Serialize};

/// Cell types on the B-lymphoid developmental path, from stem and
/// progenitor cells to mature B cells
pub const DEFAULT_B_LINEAGE: &[&str] = &[
    "HSC",
    "MPP",
    "LMPP",
    "CLP",
    "Pre-pro-B",
    "Pro-B",
    "Pre-B",
    "Immature B",
    "Naive B",
    "Memory B",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingParams {
    pub metric: Metric,
    pub search: SearchMode,
    pub projection: ProjectionArgs,
    pub qc: MappingQcArgs,
    pub transfer: LabelTransferArgs,
    /// categorical label column summarized per donor
    pub composition_label: Box<str>,
    /// minimum label confidence for a cell to be counted
    pub confidence_cutoff: f32,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            search: SearchMode::Exact,
            projection: ProjectionArgs::default(),
            qc: MappingQcArgs::default(),
            transfer: LabelTransferArgs::default(),
            composition_label: CELL_TYPE.into(),
            confidence_cutoff: DEFAULT_CONFIDENCE_CUTOFF,
        }
    }
}

/// Everything learned about the query cells from one reference
pub struct QueryMapping {
    pub reference: Box<str>,
    pub cells: Vec<Box<str>>,
    pub donors: Vec<Box<str>>,
    pub projection: QueryProjection,
    pub qc: MappingQc,
    pub labels: LabelTransfer,
    /// `None` if the composition label was not transferred
    pub composition: Option<Composition>,
}

impl QueryMapping {
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

/// Project, quality-control and label the query against one atlas
pub fn map_query(
    query: &QueryData,
    atlas: &ReferenceAtlas,
    params: &MappingParams,
) -> anyhow::Result<QueryMapping> {
    info!(
        "mapping {} cells onto reference '{}'",
        query.num_cells(),
        atlas.name()
    );

    let index = ReferenceIndex::new(atlas.embedding(), params.metric, params.search)?;

    let projection = project_query(query, atlas, &index, &params.projection)?;

    let knn = params.qc.knn.max(params.transfer.knn);
    info!("searching {} nearest reference cells", knn);
    let neighbours = index.search_columns(&projection.embedding, knn);

    let qc = MappingQc::from_neighbours(&neighbours, query.donors.as_deref(), &params.qc)?;

    let labels = transfer_labels(&neighbours, atlas.labels(), &qc.pass, &params.transfer)?;

    let donors = query.donor_names();

    let composition = match labels.categorical(&params.composition_label) {
        Some(col) => Some(Composition::from_cells(
            &col.final_labels,
            &donors,
            &qc.pass,
            &col.confidence,
            params.confidence_cutoff,
        )?),
        None => {
            warn!(
                "no categorical label '{}' transferred; skipping composition",
                params.composition_label
            );
            None
        }
    };

    Ok(QueryMapping {
        reference: atlas.name().into(),
        cells: query.cells.clone(),
        donors,
        projection,
        qc,
        labels,
        composition,
    })
}

/// Cells whose final `label_column` label is in `allow`, in order
pub fn select_cells(
    mapping: &QueryMapping,
    label_column: &str,
    allow: &[Box<str>],
) -> anyhow::Result<Vec<usize>> {
    let col = mapping.labels.categorical(label_column).ok_or(anyhow::anyhow!(
        "no categorical label '{}' to select cells by",
        label_column
    ))?;

    let allow: fnv::FnvHashSet<&str> = allow.iter().map(|x| x.as_ref()).collect();

    Ok(col
        .final_labels
        .iter()
        .enumerate()
        .filter_map(|(i, x)| match x {
            Some(x) if allow.contains(x.as_ref()) => Some(i),
            _ => None,
        })
        .collect())
}

pub struct TwoStageMapping {
    pub stage1: QueryMapping,
    /// query cells passed on to the second stage
    pub selected: Vec<usize>,
    /// `None` if no cell was selected
    pub stage2: Option<QueryMapping>,
}

/// Map onto the `broad` atlas, keep cells whose first-stage cell type
/// is in `allow`, then map only those onto the `focused` atlas
pub fn run_two_stage(
    query: &QueryData,
    broad: &ReferenceAtlas,
    focused: &ReferenceAtlas,
    allow: &[Box<str>],
    params: &MappingParams,
) -> anyhow::Result<TwoStageMapping> {
    info!("stage 1: broad reference '{}'", broad.name());
    let stage1 = map_query(query, broad, params)?;

    let selected = select_cells(&stage1, CELL_TYPE, allow)?;
    info!(
        "{} of {} cells selected for the focused reference",
        selected.len(),
        query.num_cells()
    );

    if selected.is_empty() {
        warn!("no cell selected; skipping stage 2");
        return Ok(TwoStageMapping {
            stage1,
            selected,
            stage2: None,
        });
    }

    info!("stage 2: focused reference '{}'", focused.name());
    let subset = query.subset_cells(&selected)?;
    let stage2 = map_query(&subset, focused, params)?;

    Ok(TwoStageMapping {
        stage1,
        selected,
        stage2: Some(stage2),
    })
}

pub fn default_allow_list() -> Vec<Box<str>> {
    DEFAULT_B_LINEAGE.iter().map(|&x| x.into()).collect()
}
