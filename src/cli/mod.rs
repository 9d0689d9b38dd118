//! CLI Module
//!
//! Support code for the `bluegps` binary:
//! - Exit codes for automation
//! - Location and state output formats

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, exit_code_for, ExitCodes};
pub use output::{format_location, format_state, OutputFormat, CSV_HEADER};
