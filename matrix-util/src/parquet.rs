use parquet::basic::Type as ParquetType;
use parquet::basic::{Compression, ConvertedType, Repetition, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RowAccessor;
use parquet::schema::types::Type;
use std::fs::File;
use std::sync::Arc;

/// A row-named, column-named table of numbers read from or written
/// to parquet. The first parquet column holds the row names.
pub struct NamedColumns {
    pub row_names: Vec<Box<str>>,
    pub column_names: Vec<Box<str>>,
    /// one vector per column, each of `row_names.len()`
    pub columns: Vec<Vec<f64>>,
}

/// Write columns of numbers with the row names in front
///
/// * `file_path`: output file path
/// * `row_column_name`: header of the row-name column (default `row`)
pub fn write_named_columns(
    file_path: &str,
    table: &NamedColumns,
    row_column_name: Option<&str>,
) -> anyhow::Result<()> {
    let nrows = table.row_names.len();

    if table.columns.len() != table.column_names.len() {
        return Err(anyhow::anyhow!(
            "column names length ({}) does not match number of columns ({})",
            table.column_names.len(),
            table.columns.len()
        ));
    }

    if let Some(bad) = table.columns.iter().position(|c| c.len() != nrows) {
        return Err(anyhow::anyhow!(
            "column {} has {} values, expected {}",
            table.column_names[bad],
            table.columns[bad].len(),
            nrows
        ));
    }

    crate::common_io::mkdir(file_path)?;

    let schema = build_columns_schema(row_column_name.unwrap_or("row"), &table.column_names)?;
    let zstd_level = ZstdLevel::try_new(5)?;
    let writer_properties = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(zstd_level))
            .build(),
    );

    let file = File::create(file_path)?;
    let mut writer = SerializedFileWriter::new(file, schema, writer_properties)?;
    let mut row_group = writer.next_row_group()?;

    let row_names: Vec<ByteArray> = table
        .row_names
        .iter()
        .map(|r| ByteArray::from(r.as_ref()))
        .collect();

    if let Some(mut column) = row_group.next_column()? {
        column
            .typed::<ByteArrayType>()
            .write_batch(&row_names, None, None)?;
        column.close()?;
    }

    for values in table.columns.iter() {
        if let Some(mut column) = row_group.next_column()? {
            column
                .typed::<DoubleType>()
                .write_batch(values, None, None)?;
            column.close()?;
        }
    }

    row_group.close()?;
    writer.close()?;
    Ok(())
}

/// Read all numeric columns; the first column must carry row names.
pub fn read_named_columns(file_path: &str) -> anyhow::Result<NamedColumns> {
    let file = File::open(file_path)?;
    let reader = SerializedFileReader::new(file)?;
    let metadata = reader.metadata();
    let nrows = metadata.file_metadata().num_rows() as usize;
    let fields = metadata.file_metadata().schema().get_fields();

    let numeric: Vec<(ParquetType, usize)> = fields
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(j, f)| match f.get_physical_type() {
            tt @ (ParquetType::FLOAT
            | ParquetType::DOUBLE
            | ParquetType::INT32
            | ParquetType::INT64) => Some((tt, j)),
            _ => None,
        })
        .collect();

    if numeric.is_empty() {
        return Err(anyhow::anyhow!("no numeric columns in {}", file_path));
    }

    let column_names = numeric
        .iter()
        .map(|&(_, j)| fields[j].name().to_string().into_boxed_str())
        .collect();

    let mut row_names = Vec::with_capacity(nrows);
    let mut columns = vec![Vec::with_capacity(nrows); numeric.len()];

    for record in reader.get_row_iter(None)? {
        let row = record?;
        row_names.push(row.get_string(0)?.clone().into_boxed_str());

        for (col, &(tt, j)) in columns.iter_mut().zip(numeric.iter()) {
            let x = match tt {
                ParquetType::FLOAT => row.get_float(j)? as f64,
                ParquetType::DOUBLE => row.get_double(j)?,
                ParquetType::INT32 => row.get_int(j)? as f64,
                _ => row.get_long(j)? as f64,
            };
            col.push(x);
        }
    }

    Ok(NamedColumns {
        row_names,
        column_names,
        columns,
    })
}

fn build_columns_schema(
    row_column_name: &str,
    column_names: &[Box<str>],
) -> anyhow::Result<Arc<Type>> {
    let mut fields = vec![Arc::new(
        Type::primitive_type_builder(row_column_name, ParquetType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::UTF8)
            .build()?,
    )];

    for column_name in column_names {
        fields.push(Arc::new(
            Type::primitive_type_builder(column_name, ParquetType::DOUBLE)
                .with_repetition(Repetition::REQUIRED)
                .build()?,
        ));
    }

    Ok(Arc::new(
        Type::group_type_builder("matrix")
            .with_fields(fields)
            .build()?,
    ))
}
