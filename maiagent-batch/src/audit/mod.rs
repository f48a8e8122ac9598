pub mod cleanup;
pub mod reconcile;
pub mod status_scan;

pub use reconcile::{ExtraFile, IntegrityReport, MissingFile, reconcile, verify};
pub use status_scan::{StatusReport, scan_status};
