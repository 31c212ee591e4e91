//! Derivative-free trust-region least-squares method on a vector residual.

use faer::{Col, ColRef, Mat};

use crate::driver::DriverError;
use crate::linalg::cholesky::solve_spd;
use crate::linalg::vector_ops;
use crate::localopt::{Budget, ExitStatus, LocalOptimizer, RunObjective, Stop};
use crate::options::Options;
use crate::{E, I};

/// Forward-difference step for the Jacobian columns.
const FD_STEP: E = 1e-7;
const EXPAND: E = 2.0;
const SHRINK: E = 0.5;
/// Radius below which the region has collapsed onto the current center.
const DELTA_MIN: E = 1e-13;
const LAMBDA_GROW: E = 10.0;

/// Minimizes `0.5 * ||r(x)||^2` over the unit cube without derivatives.
///
/// Each outer iteration estimates the Jacobian by forward differences (one
/// residual evaluation per coordinate), then takes a Levenberg-regularized
/// Gauss–Newton step restricted to the trust region. Every residual
/// evaluation goes through the run objective, so the whole model-building
/// process replays from history.
pub struct TrustRegionLs {
    delta_0_mult: E,
    grtol: E,
    gatol: E,
    fatol: E,
    frtol: E,
}

impl TrustRegionLs {
    pub fn new(options: &Options) -> Self {
        Self {
            delta_0_mult: options.get_option::<E>("delta_0_mult").unwrap_or(0.5),
            grtol: options.get_option::<E>("grtol").unwrap_or(1e-8),
            gatol: options.get_option::<E>("gatol").unwrap_or(1e-8),
            fatol: options.get_option::<E>("fatol").unwrap_or(1e-15),
            frtol: options.get_option::<E>("frtol").unwrap_or(1e-15),
        }
    }

    fn run(
        &self,
        x0: &Col<E>,
        search: &mut Search<'_>,
    ) -> Result<(Col<E>, ExitStatus), Stop> {
        let n = x0.nrows();
        let mut x = x0.clone();
        let mut delta = self.delta_0_mult * vector_ops::dist_to_unit_bounds(x0.as_ref());

        let mut r = search.eval(&x)?;
        let m = r.nrows();
        let mut f = E::from(0.5) * vector_ops::dot(r.as_ref(), r.as_ref());

        loop {
            // Forward-difference Jacobian, one probe per coordinate,
            // differencing backwards at the upper face.
            let mut jac: Vec<Col<E>> = Vec::with_capacity(n);
            for i in 0..n {
                let h = if x[i] + FD_STEP <= E::from(1.) {
                    FD_STEP
                } else {
                    -FD_STEP
                };
                let mut probe = x.clone();
                probe[i] += h;
                let r_probe = search.eval(&probe)?;
                jac.push(Col::from_fn(m, |k| (r_probe[k] - r[k]) / h));
            }

            let g = Col::from_fn(n, |i| vector_ops::dot(jac[i].as_ref(), r.as_ref()));
            let gnorm = vector_ops::norm(g.as_ref());
            if !gnorm.is_finite() {
                // The residual blew up inside the model region.
                return Ok((x, ExitStatus::Failed));
            }
            if gnorm <= self.gatol || gnorm <= self.grtol * f.abs() {
                return Ok((x, ExitStatus::GtolReached));
            }

            // Gauss–Newton normal matrix.
            let mut normal = Mat::<E>::zeros(n, n);
            for i in 0..n {
                for j in 0..n {
                    normal[(i, j)] = vector_ops::dot(jac[i].as_ref(), jac[j].as_ref());
                }
            }
            let mut diag_mean = E::from(0.);
            for i in 0..n {
                diag_mean += normal[(i, i)];
            }
            diag_mean /= n as E;

            let neg_g = Col::from_fn(n, |i| -g[i]);

            loop {
                // Regularize until the step fits the region.
                let mut lambda = E::from(0.);
                let mut step = None;
                for _ in 0..60 {
                    let mut regularized = normal.clone();
                    for i in 0..n {
                        regularized[(i, i)] += lambda;
                    }
                    if let Some(d) = solve_spd(regularized.as_ref(), neg_g.as_ref()) {
                        if vector_ops::norm(d.as_ref()) <= delta {
                            step = Some(d);
                            break;
                        }
                    }
                    lambda = if lambda == E::from(0.) {
                        (diag_mean * 1e-3).max(1e-8)
                    } else {
                        lambda * LAMBDA_GROW
                    };
                }
                let step = step.unwrap_or_else(|| {
                    // Steepest descent on the region boundary.
                    Col::from_fn(n, |i| neg_g[i] * (delta / gnorm))
                });

                let mut x_trial = Col::from_fn(n, |i| x[i] + step[i]);
                vector_ops::clamp_unit(&mut x_trial);

                if x_trial == x {
                    // Projection swallowed the whole step.
                    delta *= SHRINK;
                    if delta < DELTA_MIN {
                        return Ok((x, ExitStatus::XtolReached));
                    }
                    continue;
                }

                let r_trial = search.eval(&x_trial)?;
                let f_trial = E::from(0.5) * vector_ops::dot(r_trial.as_ref(), r_trial.as_ref());

                if f_trial < f {
                    let reduction = f - f_trial;
                    let f_prev = f;
                    x = x_trial;
                    r = r_trial;
                    f = f_trial;
                    delta *= EXPAND;
                    if reduction <= self.fatol || reduction <= self.frtol * f_prev.abs() {
                        return Ok((x, ExitStatus::FtolReached));
                    }
                    break;
                }

                delta *= SHRINK;
                if delta < DELTA_MIN {
                    return Ok((x, ExitStatus::XtolReached));
                }
            }
        }
    }
}

impl LocalOptimizer for TrustRegionLs {
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

/// Budgeted residual evaluation tracking the best center seen.
struct Search<'a> {
    objective: &'a mut dyn RunObjective,
    budget: Budget,
    best: Option<(Col<E>, E)>,
}

impl Search<'_> {
    fn eval(&mut self, x: &Col<E>) -> Result<Col<E>, Stop> {
        let fvec = self.budget.residual(self.objective, x)?;
        let f = E::from(0.5) * vector_ops::dot(fvec.as_ref(), fvec.as_ref());
        if self.best.as_ref().is_none_or(|(_, f_best)| f < *f_best) {
            self.best = Some((x.clone(), f));
        }
        Ok(fvec)
    }
}
