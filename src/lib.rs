//! Measure the on-disk footprint of a Python environment: which distributions are
//! installed, what pulls each of them in and how many bytes they cost.

pub mod alternatives;
pub mod cli;
pub mod compare;
pub mod config;
pub mod environment;
pub mod error;
pub mod exit_codes;
pub mod graph;
pub mod interrupt;
pub mod manifests;
pub mod report;
pub mod scan;
pub mod size;
pub mod unused;
pub mod updates;
pub mod why;
