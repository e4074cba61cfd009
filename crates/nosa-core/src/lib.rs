//! NOSA-Core: data model for biological time-series analysis
//!
//! Signals, sources, regions of interest and the shared error type.

pub mod error;
pub mod region;
pub mod signal;
pub mod source;

pub use error::{NosaError, NosaResult};
pub use region::*;
pub use signal::*;
pub use source::*;
