//! Seam between the estimator and whatever produces detector observations.
//!
//! Readers for mission file formats live outside this crate and implement
//! [`ObservationSource`]; the engine itself performs no I/O.

use crate::estimator::{EstimatorError, ObservationSet};
use crate::types::MissionMetadata;

pub trait ObservationSource {
    /// Pixel coordinates, the `time x pixel` flux block and time identifiers.
    fn load(&self) -> Result<ObservationSet, EstimatorError>;

    /// Descriptive header values. Defaults to empty.
    fn metadata(&self) -> MissionMetadata {
        MissionMetadata::default()
    }
}

impl ObservationSource for ObservationSet {
    fn load(&self) -> Result<ObservationSet, EstimatorError> {
        self.validate()?;
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Estimator;
    use ndarray::{Array1, Array2, array};

    struct ChannelFixture {
        observations: ObservationSet,
    }

    impl ObservationSource for ChannelFixture {
        fn load(&self) -> Result<ObservationSet, EstimatorError> {
            Ok(self.observations.clone())
        }

        fn metadata(&self) -> MissionMetadata {
            MissionMetadata {
                mission: Some("K2".to_string()),
                channel: Some(41),
                quarter: None,
                campaign: Some(8),
            }
        }
    }

    fn observations() -> ObservationSet {
        let row = Array1::linspace(200.0, 260.0, 12);
        let column = Array1::from_elem(12, 30.0);
        let flux = Array2::from_shape_fn((3, 12), |(t, p)| 40.0 + t as f64 + 0.01 * p as f64);
        ObservationSet::new(row, column, flux, array![7, 8, 9]).expect("consistent fixture")
    }

    #[test]
    fn estimator_keeps_source_metadata() {
        let source = ChannelFixture {
            observations: observations(),
        };
        let estimator = Estimator::from_source(&source).expect("fit should succeed");
        assert_eq!(estimator.metadata().channel, Some(41));
        assert_eq!(estimator.metadata().campaign, Some(8));
        assert_eq!(estimator.shape(), (3, 12));
    }

    #[test]
    fn in_memory_observations_are_their_own_source() {
        let estimator = Estimator::from_source(&observations()).expect("fit should succeed");
        assert_eq!(estimator.metadata(), &MissionMetadata::default());
        assert_eq!(estimator.time_ids(), array![7, 8, 9].view());
    }

    #[test]
    fn invalid_in_memory_observations_fail_to_load() {
        let mut broken = observations();
        broken.time_ids = array![1];
        let err = broken.load().expect_err("time ids do not match flux");
        assert!(matches!(err, EstimatorError::ShapeMismatch(_)));
    }
}
