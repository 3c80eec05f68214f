//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - Trim: Applies each tier's count, cost/size and age limits at its configured interval

mod trim;

pub use trim::{AutoTrim, TrimWorker, MIN_TRIM_INTERVAL};
