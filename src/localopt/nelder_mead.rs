//! Nelder–Mead simplex method on the unit cube.

use faer::{Col, ColRef};

use crate::driver::DriverError;
use crate::linalg::vector_ops;
use crate::localopt::{Budget, ExitStatus, LocalOptimizer, RunObjective, Stop};
use crate::options::Options;
use crate::{E, I};

/// Reflection, expansion, contraction, and shrink coefficients.
const ALPHA: E = 1.0;
const GAMMA: E = 2.0;
const RHO: E = 0.5;
const SIGMA: E = 0.5;

/// Derivative-free simplex method with the standard coefficient set,
/// constrained to the unit cube by projecting trial points onto it.
///
/// The starting simplex spans `x0 + h e_i` with `h` the distance from `x0`
/// to the nearest cube face, so the initial vertices never leave the cube.
pub struct NelderMead {
    xtol_rel: E,
}

impl NelderMead {
    pub fn new(options: &Options) -> Self {
        Self {
            xtol_rel: options.get_option::<E>("xtol_rel").unwrap_or(1e-4),
        }
    }

    /// Simplex collapse test: every vertex agrees with the best vertex to
    /// within the relative x-tolerance, componentwise.
    fn collapsed(&self, vertices: &[Col<E>]) -> bool {
        let best = &vertices[0];
        vertices[1..].iter().all(|v| {
            (0..best.nrows())
                .all(|i| (v[i] - best[i]).abs() <= self.xtol_rel * (best[i].abs() + self.xtol_rel))
        })
    }

    fn run(
        &self,
        x0: &Col<E>,
        search: &mut Search<'_>,
    ) -> Result<(Col<E>, ExitStatus), Stop> {
        let n = x0.nrows();
        let step = vector_ops::dist_to_unit_bounds(x0.as_ref());
        if step <= E::from(0.) {
            // No room for an initial simplex: the point sits on a face, and
            // every vertex would repeat it.
            return Ok((x0.clone(), ExitStatus::XtolReached));
        }

        let mut vertices: Vec<Col<E>> = Vec::with_capacity(n + 1);
        let mut values: Vec<E> = Vec::with_capacity(n + 1);

        values.push(search.eval(x0)?);
        vertices.push(x0.clone());
        for i in 0..n {
            let mut v = x0.clone();
            v[i] += step;
            values.push(search.eval(&v)?);
            vertices.push(v);
        }

        loop {
            // Order vertices by value, best first.
            let mut order: Vec<I> = (0..=n).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            vertices = order.iter().map(|&k| vertices[k].clone()).collect();
            values = order.iter().map(|&k| values[k]).collect();

            if self.collapsed(&vertices) {
                return Ok((vertices[0].clone(), ExitStatus::XtolReached));
            }

            // Centroid of all vertices but the worst.
            let mut centroid = Col::<E>::zeros(n);
            for v in &vertices[..n] {
                for i in 0..n {
                    centroid[i] += v[i];
                }
            }
            for i in 0..n {
                centroid[i] /= n as E;
            }

            let worst = vertices[n].clone();
            let mut reflected = Col::from_fn(n, |i| centroid[i] + ALPHA * (centroid[i] - worst[i]));
            vector_ops::clamp_unit(&mut reflected);
            let f_reflected = search.eval(&reflected)?;

            if f_reflected < values[0] {
                // The reflection is the new best point: try to expand past it.
                let mut expanded =
                    Col::from_fn(n, |i| centroid[i] + GAMMA * (centroid[i] - worst[i]));
                vector_ops::clamp_unit(&mut expanded);
                let f_expanded = search.eval(&expanded)?;
                if f_expanded < f_reflected {
                    vertices[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    vertices[n] = reflected;
                    values[n] = f_reflected;
                }
            } else if f_reflected < values[n - 1] {
                vertices[n] = reflected;
                values[n] = f_reflected;
            } else {
                // Contract, outside or inside depending on the reflection.
                let outside = f_reflected < values[n];
                let mut contracted = if outside {
                    Col::from_fn(n, |i| centroid[i] + RHO * (reflected[i] - centroid[i]))
                } else {
                    Col::from_fn(n, |i| centroid[i] - RHO * (centroid[i] - worst[i]))
                };
                vector_ops::clamp_unit(&mut contracted);
                let f_contracted = search.eval(&contracted)?;
                let reference = if outside { f_reflected } else { values[n] };

                if f_contracted < reference {
                    vertices[n] = contracted;
                    values[n] = f_contracted;
                } else {
                    // Shrink every vertex towards the best one.
                    for k in 1..=n {
                        let shrunk = Col::from_fn(n, |i| {
                            vertices[0][i] + SIGMA * (vertices[k][i] - vertices[0][i])
                        });
                        values[k] = search.eval(&shrunk)?;
                        vertices[k] = shrunk;
                    }
                }
            }
        }
    }
}

impl LocalOptimizer for NelderMead {
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

/// Budgeted evaluation with best-point tracking.
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
