//! Runtime option registry for the generator.
//!
//! Options are stored as boxed [`OptionTrait`] values keyed by name and
//! accessed through type-checked downcasts. Every recognized option is
//! registered with a default; setting an unregistered name or a value of the
//! wrong type is rejected.

use std::any::Any;
use std::collections::HashMap;
use std::sync::LazyLock;

use faer::Col;

use crate::localopt::LocalOptMethod;
use crate::{E, OptionTrait};

/// Default reduction from a residual vector to a scalar objective.
pub fn sum_of_squares(fvec: &Col<E>) -> E {
    let mut total = E::from(0.);
    for i in 0..fvec.nrows() {
        total += fvec[i] * fvec[i];
    }
    total
}

static OPTION_REGISTRY: LazyLock<HashMap<String, Box<dyn OptionTrait>>> = LazyLock::new(|| {
    let mut map: HashMap<String, Box<dyn OptionTrait>> = HashMap::new();
    map.extend([
        // Domain bounds; empty until set by the caller.
        (
            "lb".to_string(),
            Box::new(Col::<E>::zeros(0)) as Box<dyn OptionTrait>,
        ),
        (
            "ub".to_string(),
            Box::new(Col::<E>::zeros(0)) as Box<dyn OptionTrait>,
        ),
        (
            "initial_sample".to_string(),
            Box::new(0usize) as Box<dyn OptionTrait>,
        ),
        ("rk_const".to_string(), Box::new(0.0) as Box<dyn OptionTrait>),
        (
            "lhs_divisions".to_string(),
            Box::new(0usize) as Box<dyn OptionTrait>,
        ),
        ("mu".to_string(), Box::new(0.0) as Box<dyn OptionTrait>),
        ("nu".to_string(), Box::new(0.0) as Box<dyn OptionTrait>),
        (
            "gamma_quantile".to_string(),
            Box::new(1.0) as Box<dyn OptionTrait>,
        ),
        (
            "localopt_method".to_string(),
            Box::new(LocalOptMethod::NelderMead) as Box<dyn OptionTrait>,
        ),
        ("xtol_rel".to_string(), Box::new(1e-4) as Box<dyn OptionTrait>),
        ("grtol".to_string(), Box::new(1e-8) as Box<dyn OptionTrait>),
        ("gatol".to_string(), Box::new(1e-8) as Box<dyn OptionTrait>),
        ("fatol".to_string(), Box::new(1e-15) as Box<dyn OptionTrait>),
        ("frtol".to_string(), Box::new(1e-15) as Box<dyn OptionTrait>),
        (
            "delta_0_mult".to_string(),
            Box::new(0.5) as Box<dyn OptionTrait>,
        ),
        (
            "min_batch_size".to_string(),
            Box::new(1usize) as Box<dyn OptionTrait>,
        ),
        (
            "single_component_at_a_time".to_string(),
            Box::new(false) as Box<dyn OptionTrait>,
        ),
        (
            "components".to_string(),
            Box::new(0usize) as Box<dyn OptionTrait>,
        ),
        (
            "combine_component_func".to_string(),
            Box::new(sum_of_squares as fn(&Col<E>) -> E) as Box<dyn OptionTrait>,
        ),
        ("seed".to_string(), Box::new(0u64) as Box<dyn OptionTrait>),
        (
            "run_state_dir".to_string(),
            Box::new(".".to_string()) as Box<dyn OptionTrait>,
        ),
    ]);
    map
});

/// Name-to-value option map seeded with the registry defaults.
#[derive(Clone)]
pub struct Options {
    map: HashMap<String, Box<dyn OptionTrait>>,
}

impl Options {
    pub fn new() -> Self {
        let map = OPTION_REGISTRY.clone();
        Self { map }
    }

    pub fn get_option<T: OptionTrait>(&self, name: &str) -> Option<T>
    where
        T: Clone,
    {
        self.map
            .get(name)
            .and_then(|v| (v.as_ref() as &dyn Any).downcast_ref::<T>())
            .cloned()
    }

    pub fn set_option<T: OptionTrait>(&mut self, name: &str, value: T) -> Result<(), String> {
        match self.map.get(name) {
            None => Err(format!("Option '{}' is not registered.", name)),
            Some(current) => {
                if (current.as_ref() as &dyn Any).downcast_ref::<T>().is_some() {
                    self.map.insert(name.to_string(), Box::new(value));
                    Ok(())
                } else {
                    Err(format!(
                        "Type mismatch for option '{}'. Expected {}.",
                        name,
                        std::any::type_name::<T>(),
                    ))
                }
            }
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_roundtrip() {
        let mut options = Options::new();
        assert_eq!(options.get_option::<E>("gamma_quantile"), Some(1.0));
        assert_eq!(options.get_option::<usize>("lhs_divisions"), Some(0));

        options.set_option("rk_const", 0.5).unwrap();
        assert_eq!(options.get_option::<E>("rk_const"), Some(0.5));

        let lb = Col::from_fn(2, |_| -1.0);
        options.set_option("lb", lb).unwrap();
        assert_eq!(options.get_option::<Col<E>>("lb").unwrap().nrows(), 2);
    }

    #[test]
    fn test_rejects_unknown_and_mistyped() {
        let mut options = Options::new();
        assert!(options.set_option("no_such_option", 1.0).is_err());
        assert!(options.set_option("rk_const", true).is_err());
    }

    #[test]
    fn test_sum_of_squares() {
        let fvec = Col::from_fn(3, |i| [1.0, 2.0, 2.0][i]);
        assert_eq!(sum_of_squares(&fvec), 9.0);
    }
}
