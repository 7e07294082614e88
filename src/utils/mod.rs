//! Common utilities shared by the binaries.
//!
//! - **`data_loader`**: reads datasets from CSV files and writes them back, so that the
//!   `sharpness` binary can train on external data and `datagen` can produce it.

pub mod data_loader;
