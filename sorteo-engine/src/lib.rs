pub mod analysis;
pub mod builder;
pub mod config;
pub mod convergence;
pub mod coverage;
pub mod display;
pub mod learning;
pub mod memory;
pub mod numeric;
pub mod popularity;
pub mod tickets;
pub mod validation;
