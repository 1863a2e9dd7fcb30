//! Analysis engine for genome-wide insertional mutagenesis screens.
//!
//! The crate maps sequenced insertion sites onto annotated gene regions and
//! computes the per-gene statistics behind intracellular phenotype (IP/PA)
//! and synthetic lethal (SL) screens.  The binary in `main.rs` is a thin
//! command line layer over these modules.

pub mod analysis;
pub mod cache;
pub mod common;
pub mod err;
pub mod insertions;
pub mod jobs;
pub mod screens;
pub mod stats;
pub mod transcripts;
