use serde::{Deserialize, Serialize};

pub fn default_clip_sigma() -> f64 {
    3.0
}

pub fn default_clip_max_iters() -> usize {
    5
}

/// Iterative sigma-clipping parameters used by the outlier mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipOptions {
    /// Half-width of the retained band in units of the retained scatter.
    #[serde(default = "default_clip_sigma")]
    pub sigma: f64,
    /// Upper bound on clipping passes; clipping stops earlier once a pass rejects nothing.
    #[serde(default = "default_clip_max_iters")]
    pub max_iters: usize,
}

impl Default for SigmaClipOptions {
    fn default() -> Self {
        Self {
            sigma: default_clip_sigma(),
            max_iters: default_clip_max_iters(),
        }
    }
}

/// Isotropic Gaussian prior over basis coefficients.
///
/// The same standard deviation applies to every coefficient, so the penalty
/// added to the normal equations is `I / sigma^2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    pub sigma: f64,
}

impl GaussianPrior {
    pub const DEFAULT_SIGMA: f64 = 40.0;

    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }

    #[inline]
    pub fn precision(&self) -> f64 {
        1.0 / (self.sigma * self.sigma)
    }
}

impl Default for GaussianPrior {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIGMA)
    }
}

/// Spatial axes that contribute basis functions.
///
/// Only the detector row axis is modelled. The column coordinate is accepted
/// and validated everywhere coordinates are passed, but it never enters the
/// design matrix. Column-dependent terms are deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BasisAxes {
    #[default]
    Row,
}

/// Descriptive header values carried alongside an observation set.
///
/// Nothing in the fit or prediction paths reads these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionMetadata {
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub channel: Option<i32>,
    #[serde(default)]
    pub quarter: Option<i32>,
    #[serde(default)]
    pub campaign: Option<i32>,
}
