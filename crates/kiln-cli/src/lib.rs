//! Kiln CLI library - demo graphs and reports shared by the binary and tests.

pub mod demos;
pub mod inspect;

pub use demos::{format_tensors, random_inputs, Demo};
pub use inspect::render_report;
