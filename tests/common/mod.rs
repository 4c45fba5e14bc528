//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestData, catalog_doc, CHIM_TITLE, TRENIERS_NAME, CHIM_DURATION};
//!
//! #[test]
//! fn test_load() {
//!     let data = TestData::new();
//!     data.write_catalog("A/TRA.json", &catalog_doc("SO1", CHIM_TITLE, "AR1", TRENIERS_NAME, CHIM_DURATION));
//!     let report = data.run_direct();
//!     assert!(!report.is_failed());
//! }
//! ```

mod constants;
mod fixtures;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::{catalog_doc, event_line, play_line, TestData};
