/// Column-wise normalization
pub trait MatOps {
    type Mat;
    type Scalar;

    /// `x[,j] / |x[,j]|`; zero columns stay zero
    fn normalize_columns_inplace(&mut self);
    fn normalize_columns(&self) -> Self::Mat;
}

/// Operations to sample random matrices
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize) -> Self::Mat;

    /// Sample `N(0,1)` with a fixed seed for reproducible results
    fn rnorm_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat;
}

/// A matrix carrying its row and column names
#[derive(Debug, Clone)]
pub struct MatWithNames<M> {
    pub rows: Vec<Box<str>>,
    pub cols: Vec<Box<str>>,
    pub mat: M,
}

/// Read and write named matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    /// Tab-separated with a header line `{row_column}\t{cols...}`;
    /// gzipped if the file ends with `.gz`
    fn to_tsv_with_names(
        &self,
        tsv_file: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
        row_column: &str,
    ) -> anyhow::Result<()>;

    fn from_tsv_with_names(tsv_file: &str) -> anyhow::Result<MatWithNames<Self::Mat>>;

    fn to_parquet_with_names(
        &self,
        file_path: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
        row_column: &str,
    ) -> anyhow::Result<()>;

    fn from_parquet_with_names(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>>;
}
