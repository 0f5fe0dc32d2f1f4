//! I/O modules for reading input grids and exporting correction results

pub mod grid_reader;
pub mod grid_writer;

pub use grid_reader::{GridLayer, GridReader};
pub use grid_writer::GridWriter;
