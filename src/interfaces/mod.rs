//! Outer surfaces of the CLI: CSV journal input, order CSV output and
//! tenant provisioning from a JSON file.

pub mod csv;
pub mod journal;
pub mod provisioning;
