//! Out-of-bag conformal calibration.
//!
//! - [`ErrorFunction`]: nonconformity score of a prediction
//! - [`CalibrationRecords`]: per-instance out-of-bag predictions, recalibration
//!   times and scores, with the [`Recalibration`] policies
//! - [`ConformalForest`]: a [`QuantileForest`](crate::model::QuantileForest)
//!   wrapped with calibrated intervals

mod conformal;
mod records;
mod score;

pub use conformal::{
    CalibrationConfig, CalibrationConfigBuilder, CalibrationMeasurements, ConformalForest,
};
pub use records::{CalibrationRecords, InstanceKey, Recalibration, RecalibrationPass};
pub use score::{conformal_quantile, ErrorFunction};
