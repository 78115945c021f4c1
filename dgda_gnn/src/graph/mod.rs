pub mod data;
pub mod dataset;
pub mod model;
pub mod train;
pub mod transform;
