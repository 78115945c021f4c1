pub mod benchmark;
pub mod cli;
pub mod error;
pub mod eval;
pub mod graph;

pub use error::{DgdaError, Result};
