use std::any::Any;

use dyn_clone::DynClone;
use faer::Col;

pub type E = f64;
pub type I = usize;

pub mod distance;
pub mod driver;
pub mod generator;
pub mod history;
pub mod linalg;
pub mod localopt;
pub mod options;
pub mod runs;
pub mod sampling;
pub mod startpoints;

#[cfg(test)]
pub mod tests;

pub use driver::DriverError;
pub use generator::{Aposmm, Column, GenOutput, GeneratorError, aposmm};
pub use history::{EvalData, History, HistoryRow, RunId};
pub use localopt::{ExitStatus, LocalOptMethod};
pub use options::Options;

/// Marker trait for values that can be stored in the [`Options`] registry.
pub trait OptionTrait: Any + Sync + Send + DynClone {}

/// Declares the types an [`Options`] entry may hold.
macro_rules! option_values {
    ($($ty:ty),* $(,)?) => {
        $(impl OptionTrait for $ty {})*
    };
}

option_values!(
    bool,
    usize,
    u64,
    f64,
    &'static str,
    String,
    // Bounds vectors and the component-combine reduction.
    Col<E>,
    fn(&Col<E>) -> E,
);

impl Clone for Box<dyn OptionTrait> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}
