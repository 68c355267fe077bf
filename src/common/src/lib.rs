#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod descriptor;
pub mod error;
pub mod estimator;
