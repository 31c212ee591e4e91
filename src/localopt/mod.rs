//! Local-optimization methods and the contract the run driver holds them
//! to.
//!
//! A local solver is given a starting point on the unit cube, a two-channel
//! objective, and an evaluation budget. It must be deterministic: fed the
//! same starting point and the same sequence of objective values, it asks
//! for exactly the same sequence of points. The driver relies on this to
//! replay a solver against a run's cached evaluations and capture the next
//! point it would have asked for.

pub mod blmvm;
pub mod nelder_mead;
pub mod trust_region;

use enum_dispatch::enum_dispatch;
use faer::{Col, ColRef};

use crate::driver::DriverError;
use crate::options::Options;
use crate::{E, I};

use blmvm::Blmvm;
use nelder_mead::NelderMead;
use trust_region::TrustRegionLs;

/// The supported local-optimization methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOptMethod {
    /// Derivative-free simplex method on the scalar objective.
    NelderMead,
    /// Derivative-free trust-region least-squares method on the residual
    /// vector.
    TrustRegionLs,
    /// Bounded variable-metric method using finite-difference gradients.
    Blmvm,
}

impl crate::OptionTrait for LocalOptMethod {}

/// Exit condition reported by a local solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Relative x-tolerance met. The solver is at a minimum it has already
    /// evaluated, and may have re-requested that same point.
    XtolReached,
    /// Objective-change tolerance met.
    FtolReached,
    /// Gradient tolerance met.
    GtolReached,
    /// Evaluation budget exhausted before convergence.
    EvalLimit,
    /// The solver failed internally; treated as "no new point this round".
    Failed,
}

impl ExitStatus {
    /// Whether this status declares the run to be at a minimum.
    pub fn converged(self) -> bool {
        matches!(
            self,
            ExitStatus::XtolReached | ExitStatus::FtolReached | ExitStatus::GtolReached
        )
    }
}

/// The objective surface a solver sees during one driver step.
///
/// Scalar methods use [`scalar`](RunObjective::scalar); residual methods use
/// [`residual`](RunObjective::residual). Both channels share one evaluation
/// sequence.
pub trait RunObjective {
    fn scalar(&mut self, x: ColRef<'_, E>) -> Result<E, DriverError>;

    fn residual(&mut self, x: ColRef<'_, E>) -> Result<Col<E>, DriverError>;
}

/// Early exit from a solver's inner loops: either the budget ran out or the
/// replay layer reported a protocol violation that must propagate.
pub(crate) enum Stop {
    Budget,
    Fatal(DriverError),
}

impl From<DriverError> for Stop {
    fn from(err: DriverError) -> Self {
        Stop::Fatal(err)
    }
}

/// Contract between the driver and a local solver.
#[enum_dispatch]
pub trait LocalOptimizer {
    /// Minimizes the objective from `x0` over the unit cube, spending at
    /// most `budget` evaluations, and reports the best point it knows along
    /// with how it stopped.
    fn minimize(
        &self,
        x0: ColRef<'_, E>,
        objective: &mut dyn RunObjective,
        budget: I,
    ) -> Result<(Col<E>, ExitStatus), DriverError>;
}

/// The built-in solvers behind one dispatchable value.
#[enum_dispatch(LocalOptimizer)]
pub enum LocalSolver {
    NelderMead,
    TrustRegionLs,
    Blmvm,
}

impl LocalSolver {
    pub fn from_options(method: LocalOptMethod, options: &Options) -> Self {
        match method {
            LocalOptMethod::NelderMead => NelderMead::new(options).into(),
            LocalOptMethod::TrustRegionLs => TrustRegionLs::new(options).into(),
            LocalOptMethod::Blmvm => Blmvm::new(options).into(),
        }
    }

    /// Whether the method consumes the residual vector rather than the
    /// scalar objective.
    pub fn uses_residual(&self) -> bool {
        matches!(self, LocalSolver::TrustRegionLs(_))
    }
}

/// Budget-limited evaluation counter shared by the built-in solvers.
///
/// The final budgeted evaluation is performed (so the replay layer can
/// capture it) but its value is never trusted: the replay layer answers
/// beyond-history queries with a placeholder. Solvers therefore stop
/// immediately after spending their last evaluation, which keeps every
/// decision they make a function of genuine history values.
pub(crate) struct Budget {
    used: I,
    max: I,
}

impl Budget {
    pub(crate) fn new(max: I) -> Self {
        Self { used: 0, max }
    }

    pub(crate) fn scalar(
        &mut self,
        objective: &mut dyn RunObjective,
        x: &Col<E>,
    ) -> Result<E, Stop> {
        if self.used >= self.max {
            return Err(Stop::Budget);
        }
        self.used += 1;
        let f = objective.scalar(x.as_ref())?;
        if self.used == self.max {
            return Err(Stop::Budget);
        }
        Ok(f)
    }

    pub(crate) fn residual(
        &mut self,
        objective: &mut dyn RunObjective,
        x: &Col<E>,
    ) -> Result<Col<E>, Stop> {
        if self.used >= self.max {
            return Err(Stop::Budget);
        }
        self.used += 1;
        let fvec = objective.residual(x.as_ref())?;
        if self.used == self.max {
            return Err(Stop::Budget);
        }
        Ok(fvec)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Plain objective adapters for exercising solvers directly.

    use super::*;

    pub(crate) struct ScalarFn<F: FnMut(&Col<E>) -> E> {
        pub f: F,
        pub evals: I,
    }

    impl<F: FnMut(&Col<E>) -> E> ScalarFn<F> {
        pub(crate) fn new(f: F) -> Self {
            Self { f, evals: 0 }
        }
    }

    impl<F: FnMut(&Col<E>) -> E> RunObjective for ScalarFn<F> {
        fn scalar(&mut self, x: ColRef<'_, E>) -> Result<E, DriverError> {
            self.evals += 1;
            Ok((self.f)(&x.to_owned()))
        }

        fn residual(&mut self, _x: ColRef<'_, E>) -> Result<Col<E>, DriverError> {
            unimplemented!("scalar test objective has no residual channel")
        }
    }

    pub(crate) struct ResidualFn<F: FnMut(&Col<E>) -> Col<E>> {
        pub f: F,
        pub evals: I,
    }

    impl<F: FnMut(&Col<E>) -> Col<E>> ResidualFn<F> {
        pub(crate) fn new(f: F) -> Self {
            Self { f, evals: 0 }
        }
    }

    impl<F: FnMut(&Col<E>) -> Col<E>> RunObjective for ResidualFn<F> {
        fn scalar(&mut self, x: ColRef<'_, E>) -> Result<E, DriverError> {
            let fvec = self.residual(x)?;
            Ok(crate::linalg::vector_ops::dot(fvec.as_ref(), fvec.as_ref()))
        }

        fn residual(&mut self, x: ColRef<'_, E>) -> Result<Col<E>, DriverError> {
            self.evals += 1;
            Ok((self.f)(&x.to_owned()))
        }
    }
}
