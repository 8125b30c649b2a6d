use crate::common::*;
use crate::composition::Composition;
use crate::label_transfer::TransferredColumn;
use crate::pipeline::QueryMapping;
use matrix_util::dmatrix_io::parse_value;

const MISSING: &str = "NA";

/// Write all the results of one mapping under the output header `hdr`
///
/// * `{hdr}.cells.tsv.gz`
/// * `{hdr}.embedding.parquet`
/// * `{hdr}.viz.parquet`
/// * `{hdr}.composition.{long,counts,proportions}.tsv.gz`
pub fn write_mapping(mapping: &QueryMapping, hdr: &str) -> anyhow::Result<()> {
    write_cell_table(mapping, &format!("{}.cells.tsv.gz", hdr))?;

    let dims: Vec<Box<str>> = (1..=mapping.projection.embedding.nrows())
        .map(|d| format!("dim{}", d).into_boxed_str())
        .collect();

    mapping.projection.embedding.transpose().to_parquet_with_names(
        &format!("{}.embedding.parquet", hdr),
        &mapping.cells,
        &dims,
        "cell",
    )?;

    mapping.projection.viz.transpose().to_parquet_with_names(
        &format!("{}.viz.parquet", hdr),
        &mapping.cells,
        &["viz1".into(), "viz2".into()],
        "cell",
    )?;

    if let Some(comp) = mapping.composition.as_ref() {
        comp.write_all(&format!("{}.composition", hdr))?;
    }

    info!("wrote {} cells to {}.*", mapping.num_cells(), hdr);
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(x: Option<T>) -> String {
    match x {
        Some(x) => x.to_string(),
        None => MISSING.to_string(),
    }
}

/// Per-cell table: cell, donor, mapping error, cutoff, QC outcome and
/// the transferred labels (`{name}_initial`, `{name}_confidence`,
/// `{name}` for the final label)
pub fn write_cell_table(mapping: &QueryMapping, file: &str) -> anyhow::Result<()> {
    let mut header = vec![
        "cell".to_string(),
        "donor".to_string(),
        "mapping_error".to_string(),
        "qc_cutoff".to_string(),
        "qc_pass".to_string(),
    ];

    for col in mapping.labels.columns.iter() {
        header.push(format!("{}_initial", col.name()));
        if let TransferredColumn::Categorical(_) = col {
            header.push(format!("{}_confidence", col.name()));
        }
        header.push(col.name().to_string());
    }

    let mut lines = Vec::with_capacity(mapping.num_cells() + 1);
    lines.push(header.join("\t").into_boxed_str());

    for i in 0..mapping.num_cells() {
        let mut words = vec![
            mapping.cells[i].to_string(),
            mapping.donors[i].to_string(),
            mapping.qc.scores[i].to_string(),
            mapping.qc.cutoffs[i].to_string(),
            mapping.qc.pass[i].to_string(),
        ];

        for col in mapping.labels.columns.iter() {
            match col {
                TransferredColumn::Categorical(x) => {
                    words.push(fmt_opt(x.initial[i].as_ref()));
                    words.push(x.confidence[i].to_string());
                    words.push(fmt_opt(x.final_labels[i].as_ref()));
                }
                TransferredColumn::Continuous(x) => {
                    words.push(fmt_opt(x.initial[i]));
                    words.push(fmt_opt(x.final_values[i]));
                }
            }
        }
        lines.push(words.join("\t").into_boxed_str());
    }

    write_lines(&lines, file)
}

/// Rebuild a composition from a cell table written by
/// [`write_cell_table`]
///
/// * `label` - name of the categorical label column
pub fn composition_from_cell_table(
    file: &str,
    label: &str,
    confidence_cutoff: f32,
) -> anyhow::Result<Composition> {
    let ReadLinesOut { lines, header } = read_lines_of_words_delim(file, "\t", 0)?;

    let column = |name: &str| -> anyhow::Result<usize> {
        header
            .iter()
            .position(|h| h.as_ref() == name)
            .ok_or(anyhow::anyhow!("no column '{}' in {}", name, file))
    };

    let donor_col = column("donor")?;
    let pass_col = column("qc_pass")?;
    let label_col = column(label)?;
    let conf_col = column(&format!("{}_confidence", label))?;

    let ncols = header.len();
    let mut labels = Vec::with_capacity(lines.len());
    let mut donors = Vec::with_capacity(lines.len());
    let mut pass = Vec::with_capacity(lines.len());
    let mut confidence = Vec::with_capacity(lines.len());

    for (i, words) in lines.into_iter().enumerate() {
        if words.len() != ncols {
            return Err(anyhow::anyhow!(
                "line {} of {} has {} fields, expected {}",
                i + 2,
                file,
                words.len(),
                ncols
            ));
        }

        let x = &words[label_col];
        labels.push(if x.is_empty() || x.as_ref() == MISSING {
            None
        } else {
            Some(x.clone())
        });
        donors.push(words[donor_col].clone());
        pass.push(words[pass_col].parse::<bool>()?);
        confidence.push(parse_value(&words[conf_col])?);
    }

    Composition::from_cells(&labels, &donors, &pass, &confidence, confidence_cutoff)
}

/// Dump the effective parameters as pretty JSON
pub fn write_parameters(param_file: &str, params: &serde_json::Value) -> anyhow::Result<()> {
    mkdir(param_file)?;
    std::fs::write(param_file, serde_json::to_string_pretty(params)?)?;
    info!("wrote parameters: {}", param_file);
    Ok(())
}
