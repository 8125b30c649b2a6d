pub use log::{debug, info, warn};

pub use matrix_util::common_io::*;
pub use matrix_util::traits::*;

pub const DEFAULT_KNN: usize = 30;
pub const DEFAULT_VIZ_KNN: usize = 15;
pub const DEFAULT_MAD_THRESHOLD: f32 = 2.5;
pub const DEFAULT_MIN_BATCH_CELLS: usize = 20;
pub const DEFAULT_SIGMA: f32 = 0.1;
pub const DEFAULT_RIDGE_LAMBDA: f32 = 1.0;
pub const DEFAULT_CONFIDENCE_CUTOFF: f32 = 0.0;

/// counts-per-`SCALE_FACTOR` before `ln(1 + x)`
pub const SCALE_FACTOR: f32 = 1e4;

/// consistency constant of the MAD under normality
pub const MAD_SCALE: f32 = 1.4826;

/// donor name given to cells without batch information
pub const IMPLICIT_BATCH: &str = "all";

pub const CELL_TYPE: &str = "cell_type";
pub const PSEUDOTIME: &str = "pseudotime";

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;
