#[macro_use]
extern crate async_trait;

pub mod manager;
pub mod wrapper;

mod cml;
mod hllpp;
mod topk;

pub use manager::Manager;
pub use wrapper::{QueryResult, RankedItem, Sketch};
