//! Bounded variable-metric method with finite-difference gradients.

use faer::{Col, ColRef};

use crate::driver::DriverError;
use crate::linalg::vector_ops;
use crate::localopt::{Budget, ExitStatus, LocalOptimizer, RunObjective, Stop};
use crate::options::Options;
use crate::{E, I};

const FD_STEP: E = 1e-7;
const ARMIJO: E = 1e-4;
const BACKTRACK: E = 0.5;
/// Step length below which the line search has stalled on the current point.
const STEP_MIN: E = 1e-14;

/// Projected descent on the unit cube with a Barzilai–Borwein scaling of the
/// gradient step.
///
/// Gradients are estimated by forward differences whose probe evaluations go
/// through the run objective, so they are effectively read out of history
/// rather than recomputed.
pub struct Blmvm {
    grtol: E,
    gatol: E,
}

impl Blmvm {
    pub fn new(options: &Options) -> Self {
        Self {
            grtol: options.get_option::<E>("grtol").unwrap_or(1e-8),
            gatol: options.get_option::<E>("gatol").unwrap_or(1e-8),
        }
    }

    fn run(
        &self,
        x0: &Col<E>,
        search: &mut Search<'_>,
    ) -> Result<(Col<E>, ExitStatus), Stop> {
        let n = x0.nrows();
        let mut x = x0.clone();
        let mut f = search.eval(&x)?;
        let mut memory: Option<(Col<E>, Col<E>)> = None;

        loop {
            let mut g = Col::<E>::zeros(n);
            for i in 0..n {
                let h = if x[i] + FD_STEP <= E::from(1.) {
                    FD_STEP
                } else {
                    -FD_STEP
                };
                let mut probe = x.clone();
                probe[i] += h;
                g[i] = (search.eval(&probe)? - f) / h;
            }

            // Project out components pushing through an active face.
            let mut projected = g.clone();
            for i in 0..n {
                let blocked_low = x[i] <= E::from(0.) && projected[i] > E::from(0.);
                let blocked_high = x[i] >= E::from(1.) && projected[i] < E::from(0.);
                if blocked_low || blocked_high {
                    projected[i] = E::from(0.);
                }
            }

            let pgnorm = vector_ops::norm(projected.as_ref());
            if !pgnorm.is_finite() {
                return Ok((x, ExitStatus::Failed));
            }
            if pgnorm <= self.gatol || pgnorm <= self.grtol * f.abs() {
                return Ok((x, ExitStatus::GtolReached));
            }

            // Barzilai–Borwein scaling from the previous (x, g) pair.
            let mut t = match &memory {
                Some((x_prev, g_prev)) => {
                    let s = Col::from_fn(n, |i| x[i] - x_prev[i]);
                    let y = Col::from_fn(n, |i| g[i] - g_prev[i]);
                    let sy = vector_ops::dot(s.as_ref(), y.as_ref());
                    if sy > E::from(0.) {
                        (vector_ops::dot(s.as_ref(), s.as_ref()) / sy).clamp(1e-8, 1e3)
                    } else {
                        E::from(1.)
                    }
                }
                None => E::from(1.) / pgnorm.max(E::from(1.)),
            };
            memory = Some((x.clone(), g.clone()));

            // Armijo backtracking along the projected path.
            loop {
                let mut x_trial = Col::from_fn(n, |i| x[i] - t * projected[i]);
                vector_ops::clamp_unit(&mut x_trial);

                if x_trial == x {
                    return Ok((x, ExitStatus::XtolReached));
                }

                let f_trial = search.eval(&x_trial)?;
                let along = vector_ops::dot(
                    projected.as_ref(),
                    Col::from_fn(n, |i| x[i] - x_trial[i]).as_ref(),
                );
                if f - f_trial >= ARMIJO * along {
                    x = x_trial;
                    f = f_trial;
                    break;
                }

                t *= BACKTRACK;
                if t < STEP_MIN {
                    return Ok((x, ExitStatus::XtolReached));
                }
            }
        }
    }
}

impl LocalOptimizer for Blmvm {
    fn minimize(
        &self,
        x0: ColRef<'_, E>,
        objective: &mut dyn RunObjective,
        budget: I,
    ) -> Result<(Col<E>, ExitStatus), DriverError> {
        let x0 = x0.to_owned();
        let mut search = Search {
            objective,
            budget: Budget::new(budget),
            best: None,
        };

        match self.run(&x0, &mut search) {
            Ok(result) => Ok(result),
            Err(Stop::Budget) => {
                let best = search.best.map_or(x0, |(x, _)| x);
                Ok((best, ExitStatus::EvalLimit))
            }
            Err(Stop::Fatal(err)) => Err(err),
        }
    }
}

struct Search<'a> {
    objective: &'a mut dyn RunObjective,
    budget: Budget,
    best: Option<(Col<E>, E)>,
}

impl Search<'_> {
    fn eval(&mut self, x: &Col<E>) -> Result<E, Stop> {
        let f = self.budget.scalar(self.objective, x)?;
        if self.best.as_ref().is_none_or(|(_, f_best)| f < *f_best) {
            self.best = Some((x.clone(), f));
        }
        Ok(f)
    }
}
