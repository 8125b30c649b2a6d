use crate::common::*;
use crate::neighbours::Neighbour;
use crate::reference::{LabelColumn, LabelValues};
use fnv::FnvHashMap as HashMap;
use serde::{Deserialize, Serialize};

const DISTANCE_EPS: f32 = 1e-6;

/// How neighbours are weighted when averaging continuous labels
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Weighting {
    Uniform,
    /// `1 / (distance + eps)`
    InverseDistance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelTransferArgs {
    pub knn: usize,
    /// reference label columns to transfer; all if `None`
    pub columns: Option<Vec<Box<str>>>,
    pub weighting: Weighting,
    /// keep final labels of cells failing mapping QC
    pub retain_failed: bool,
}

impl Default for LabelTransferArgs {
    fn default() -> Self {
        Self {
            knn: DEFAULT_KNN,
            columns: None,
            weighting: Weighting::Uniform,
            retain_failed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoricalTransfer {
    pub name: Box<str>,
    pub initial: Vec<Option<Box<str>>>,
    /// fraction of the neighbours voting for the initial label
    pub confidence: Vec<f32>,
    pub final_labels: Vec<Option<Box<str>>>,
}

#[derive(Debug, Clone)]
pub struct ContinuousTransfer {
    pub name: Box<str>,
    pub initial: Vec<Option<f32>>,
    pub final_values: Vec<Option<f32>>,
}

#[derive(Debug, Clone)]
pub enum TransferredColumn {
    Categorical(CategoricalTransfer),
    Continuous(ContinuousTransfer),
}

impl TransferredColumn {
    pub fn name(&self) -> &str {
        match self {
            TransferredColumn::Categorical(x) => &x.name,
            TransferredColumn::Continuous(x) => &x.name,
        }
    }
}

/// Labels carried over from the reference, one entry per query cell
#[derive(Debug, Clone, Default)]
pub struct LabelTransfer {
    pub columns: Vec<TransferredColumn>,
}

impl LabelTransfer {
    pub fn categorical(&self, name: &str) -> Option<&CategoricalTransfer> {
        self.columns.iter().find_map(|c| match c {
            TransferredColumn::Categorical(x) if x.name.as_ref() == name => Some(x),
            _ => None,
        })
    }

    pub fn continuous(&self, name: &str) -> Option<&ContinuousTransfer> {
        self.columns.iter().find_map(|c| match c {
            TransferredColumn::Continuous(x) if x.name.as_ref() == name => Some(x),
            _ => None,
        })
    }
}

/// Transfer reference labels to query cells by their nearest neighbours
///
/// * `neighbours` - nearest first; only the first `args.knn` are used
/// * `labels` - reference label columns
/// * `pass` - mapping QC outcome of each query cell
pub fn transfer_labels(
    neighbours: &[Vec<Neighbour>],
    labels: &[LabelColumn],
    pass: &[bool],
    args: &LabelTransferArgs,
) -> anyhow::Result<LabelTransfer> {
    if neighbours.len() != pass.len() {
        return Err(anyhow::anyhow!(
            "{} neighbour sets for {} QC flags",
            neighbours.len(),
            pass.len()
        ));
    }

    let selected: Vec<&LabelColumn> = match args.columns.as_ref() {
        Some(names) => names
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|c| c.name == *name)
                    .ok_or(anyhow::anyhow!("no label column '{}' in the reference", name))
            })
            .collect::<anyhow::Result<_>>()?,
        None => labels.iter().collect(),
    };

    let knn = args.knn.max(1);
    let keep = |i: usize| args.retain_failed || pass[i];

    let columns = selected
        .into_iter()
        .map(|col| match &col.values {
            LabelValues::Categorical(values) => {
                let (initial, confidence): (Vec<_>, Vec<_>) = neighbours
                    .iter()
                    .map(|nn_i| vote(&nn_i[..knn.min(nn_i.len())], values))
                    .unzip();
                let final_labels = initial
                    .iter()
                    .enumerate()
                    .map(|(i, x)| if keep(i) { x.clone() } else { None })
                    .collect();
                info!(
                    "transferred '{}': {} of {} cells labelled",
                    col.name,
                    initial.iter().filter(|x| x.is_some()).count(),
                    initial.len()
                );
                TransferredColumn::Categorical(CategoricalTransfer {
                    name: col.name.clone(),
                    initial,
                    confidence,
                    final_labels,
                })
            }
            LabelValues::Continuous(values) => {
                let initial: Vec<Option<f32>> = neighbours
                    .iter()
                    .map(|nn_i| average(&nn_i[..knn.min(nn_i.len())], values, args.weighting))
                    .collect();
                let final_values = initial
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| if keep(i) { x } else { None })
                    .collect();
                info!("transferred '{}'", col.name);
                TransferredColumn::Continuous(ContinuousTransfer {
                    name: col.name.clone(),
                    initial,
                    final_values,
                })
            }
        })
        .collect();

    Ok(LabelTransfer { columns })
}

/// Plurality vote of the neighbours' labels
///
/// Ties go to the label seen first, scanning from the nearest
/// neighbour. Neighbours without a label count in the denominator of
/// the confidence but vote for nothing.
pub fn vote(neighbours: &[Neighbour], values: &[Option<Box<str>>]) -> (Option<Box<str>>, f32) {
    let mut counts: HashMap<&str, usize> = HashMap::default();
    let mut order: Vec<&str> = vec![];

    for n in neighbours {
        if let Some(Some(label)) = values.get(n.index) {
            let c = counts.entry(label.as_ref()).or_insert(0);
            if *c == 0 {
                order.push(label.as_ref());
            }
            *c += 1;
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for label in order {
        let c = counts[label];
        if best.is_none_or(|(_, b)| c > b) {
            best = Some((label, c));
        }
    }

    match best {
        Some((label, c)) => (Some(label.into()), c as f32 / neighbours.len() as f32),
        None => (None, 0.0),
    }
}

/// Average of the neighbours' finite values; `None` if there are none
pub fn average(neighbours: &[Neighbour], values: &[Option<f32>], weighting: Weighting) -> Option<f32> {
    let mut num = 0_f32;
    let mut denom = 0_f32;

    for n in neighbours {
        if let Some(Some(x)) = values.get(n.index) {
            if !x.is_finite() {
                continue;
            }
            let w = match weighting {
                Weighting::Uniform => 1.0,
                Weighting::InverseDistance => 1.0 / (n.distance.max(0.0) + DISTANCE_EPS),
            };
            num += w * x;
            denom += w;
        }
    }

    if denom > 0.0 && num.is_finite() {
        Some(num / denom)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn nn(pairs: &[(usize, f32)]) -> Vec<Neighbour> {
        pairs
            .iter()
            .map(|&(index, distance)| Neighbour { index, distance })
            .collect()
    }

    fn labels(xs: &[Option<&str>]) -> Vec<Option<Box<str>>> {
        xs.iter().map(|x| x.map(Box::from)).collect()
    }

    #[test]
    fn ties_go_to_the_nearest_label() {
        let values = labels(&[Some("A"), Some("B"), Some("A"), Some("B")]);
        let (label, conf) = vote(&nn(&[(1, 0.1), (0, 0.2), (2, 0.3), (3, 0.4)]), &values);
        assert_eq!(label.as_deref(), Some("B"));
        assert_abs_diff_eq!(conf, 0.5);
    }

    #[test]
    fn missing_labels_lower_the_confidence() {
        let values = labels(&[Some("A"), None, None, Some("B"), Some("A")]);
        let (label, conf) = vote(&nn(&[(0, 0.1), (1, 0.1), (2, 0.1), (4, 0.1)]), &values);
        assert_eq!(label.as_deref(), Some("A"));
        assert_abs_diff_eq!(conf, 0.5);

        let (label, conf) = vote(&nn(&[(1, 0.1), (2, 0.1)]), &values);
        assert_eq!(label, None);
        assert_eq!(conf, 0.0);
    }

    #[test]
    fn continuous_labels_skip_missing_values() {
        let values = vec![Some(1.0), None, Some(f32::NAN), Some(3.0)];
        let neighbours = nn(&[(0, 1.0), (1, 1.0), (2, 1.0), (3, 3.0)]);

        let x = average(&neighbours, &values, Weighting::Uniform);
        assert_abs_diff_eq!(x.unwrap_or(f32::NAN), 2.0);

        // weights 1 and 1/3
        let x = average(&neighbours, &values, Weighting::InverseDistance);
        assert_abs_diff_eq!(x.unwrap_or(f32::NAN), 1.5, epsilon = 1e-4);

        assert_eq!(average(&nn(&[(1, 0.0)]), &values, Weighting::Uniform), None);
    }

    #[test]
    fn failed_cells_lose_their_final_labels() -> anyhow::Result<()> {
        let columns = vec![
            LabelColumn::categorical(CELL_TYPE, labels(&[Some("A"), Some("A"), Some("B")])),
            LabelColumn::continuous(PSEUDOTIME, vec![Some(0.1), Some(0.3), Some(0.9)]),
        ];
        let neighbours = vec![nn(&[(0, 0.1), (1, 0.2)]), nn(&[(2, 0.1), (1, 0.2)])];
        let pass = vec![true, false];

        let ret = transfer_labels(&neighbours, &columns, &pass, &LabelTransferArgs::default())?;
        let ct = ret.categorical(CELL_TYPE).ok_or(anyhow::anyhow!("cell_type"))?;
        assert_eq!(ct.initial, labels(&[Some("A"), Some("B")]));
        assert_eq!(ct.final_labels, labels(&[Some("A"), None]));
        assert_eq!(ct.confidence, vec![1.0, 0.5]);

        let pt = ret.continuous(PSEUDOTIME).ok_or(anyhow::anyhow!("pseudotime"))?;
        assert!(pt.initial[1].is_some());
        assert_eq!(pt.final_values[1], None);

        let args = LabelTransferArgs {
            retain_failed: true,
            ..Default::default()
        };
        let ret = transfer_labels(&neighbours, &columns, &pass, &args)?;
        let ct = ret.categorical(CELL_TYPE).ok_or(anyhow::anyhow!("cell_type"))?;
        assert_eq!(ct.final_labels, ct.initial);
        Ok(())
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let columns = vec![LabelColumn::continuous(PSEUDOTIME, vec![Some(0.1)])];
        let args = LabelTransferArgs {
            columns: Some(vec!["lineage".into()]),
            ..Default::default()
        };
        assert!(transfer_labels(&[vec![]], &columns, &[true], &args).is_err());
    }
}
