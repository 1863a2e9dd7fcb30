//! Screen analysis pipelines: two-channel IP/PA comparison and the
//! replicate-based synthetic lethal test.

pub mod ip;
pub mod sl;
