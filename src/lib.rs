#![deny(dead_code)]

pub mod basis;
pub mod estimator;
pub mod faer_ndarray;
pub mod fit;
pub mod mask;
pub mod matrix;
pub mod predict;
pub mod source;
pub mod types;

pub use basis::{
    BasisError, DESIGN_COLUMNS, INTERCEPT_COLUMN, SPLINE_BASIS_COUNT, SPLINE_DEGREE,
    build_design_matrix, interior_knots,
};
pub use estimator::{Estimator, EstimatorError, ObservationSet};
pub use fit::{FittedWeights, fit_weights};
pub use mask::{PixelMask, compute_mask, sigma_clip};
pub use matrix::SparseDesignMatrix;
pub use predict::{BasisCacheEntry, PixelCoordinates};
pub use source::ObservationSource;
pub use types::{BasisAxes, GaussianPrior, MissionMetadata, SigmaClipOptions};
