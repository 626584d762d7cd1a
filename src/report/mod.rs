//! Response assembly and report rendering.

pub mod assembler;
pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, ReportMetadata};
