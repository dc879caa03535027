pub mod error;
pub mod geo;
pub mod metrics;
pub mod status;

pub use error::{Error, Result};
pub use geo::GeoPoint;
pub use metrics::{MetricScores, MetricSummary};
pub use status::ImageStatus;
