//! CLI subcommands

pub mod manifests;
pub mod run;
pub mod status;
pub mod validate;
