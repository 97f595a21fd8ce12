//! Startup utilities for the oradb operator

mod crds;

pub use crds::{all_crds, ensure_crds_installed, render_crds};
