pub mod error;
pub mod shipper;
pub mod stats;

pub use error::ShipperError;
pub use shipper::{
    AppendOutcome, BatchShipper, ENTRIES_MAX, ResourcePolicy, ShipperConfig, log_name_for,
};
pub use stats::{ShipperStats, ShipperStatsSnapshot};
