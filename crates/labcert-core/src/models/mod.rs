//! Domain models for the lab certification workflow.

mod parameter;
mod report;
mod result;
mod sample;
mod staff;

pub use parameter::*;
pub use report::*;
pub use result::*;
pub use sample::*;
pub use staff::*;
