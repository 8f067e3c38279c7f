pub mod binning;
pub mod config;
pub mod controller;
pub mod convergence;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod histogram;
pub mod io;
pub mod logging;
pub mod metropolis_hastings;
pub mod progress;
pub mod stats;
pub mod step_size;
pub mod tasks;
pub mod valuehist;
pub mod walkers;

pub use error::{MhrwError, Result};
