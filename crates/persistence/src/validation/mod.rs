//! Structural validation of tenant databases.
//!
//! A tenant database follows the vault convention when it has every required
//! schema namespace. Base tables in the data schemas are counted by suffix:
//! `_h` hubs, `_s` satellites, `_l` links.

mod report;
mod validator;

pub use report::{SchemaValidationReport, TableKind};
pub use validator::SchemaValidator;
