//! Advances active runs by replaying their solver against cached history.
//!
//! A third-party-style solver cannot be paused and resumed, so each driver
//! step re-runs it from the run's starting point, answering its queries from
//! the evaluations the run has already accumulated. The first query beyond
//! the stored prefix is captured: it is the next point the manager should
//! evaluate. A solver that finishes replay without asking for anything new
//! has either converged or violated the protocol.

use std::collections::HashMap;

use derive_more::{Display, Error};
use faer::{Col, ColRef};

use crate::history::{ComponentMode, EvalData, History, RunId};
use crate::linalg::vector_ops;
use crate::localopt::{ExitStatus, LocalOptimizer, LocalSolver, RunObjective};
use crate::{E, I};

/// Replay agreement tolerance between a solver query and the stored point.
const MATCH_TOL: E = 1e-8;

/// Protocol violations inside a driver step. Each indicates a bug in solver
/// determinism or in run bookkeeping, not a recoverable condition.
#[derive(Debug, Display, Error, PartialEq)]
pub enum DriverError {
    #[display("history point does not match the localopt point (run {run}, evaluation {eval})")]
    ReplayMismatch { run: RunId, eval: I },

    #[display("generated an already evaluated point (run {run})")]
    DuplicatePoint { run: RunId },

    #[display("no new point requested by the localopt method, but not declared optimal (run {run})")]
    NoNewPoint { run: RunId },

    #[display("expected exactly one history row at the reported optimum, found {count} (run {run})")]
    AmbiguousOptimum { run: RunId, count: I },

    #[display("residual data is unavailable for a vector-residual method (run {run}, evaluation {eval})")]
    MissingResidual { run: RunId, eval: I },
}

/// Result of one driver step over a single run.
#[derive(Debug)]
pub enum StepOutcome {
    /// The solver asked for a new point; `iter` is its one-based step
    /// within the run.
    NewPoint { x_on_cube: Col<E>, iter: I },
    /// The run converged; `opt_row` is the unique history row at the
    /// reported minimum and `members` the run's rows.
    Converged { opt_row: I, members: Vec<I> },
    /// Some of the run's points are still being evaluated.
    Waiting,
    /// The solver failed; the run stays active and is retried next
    /// invocation.
    Failed,
}

/// Replays the solver for one run and reports what the run needs next.
pub fn advance_run(
    hist: &History,
    run: RunId,
    solver: &LocalSolver,
    component: Option<&ComponentMode>,
) -> Result<StepOutcome, DriverError> {
    let members = hist.rows_in_run(run);

    // A registry entry with no rows behind it (a truncated history) has
    // nothing to replay yet.
    if members.is_empty() || members.iter().any(|&i| !hist[i].returned) {
        return Ok(StepOutcome::Waiting);
    }

    let total = members.len();
    let mut replay = Replay::from_history(hist, run, &members, solver.uses_residual(), component)?;
    let x0 = replay.xs[0].clone();

    // One more evaluation than the run has stored: exactly enough for the
    // solver to reproduce its trajectory and ask for the next point.
    let (x_opt, status) = solver.minimize(x0.as_ref(), &mut replay, total + 1)?;

    let mut x_new = replay.x_new;
    if status == ExitStatus::XtolReached {
        // At an x-tolerance stop the solver re-requests the point it is
        // sitting on; discard the capture rather than duplicate it.
        x_new = None;
    }

    match x_new {
        Some(x) => {
            if !hist.find_exact(&x).is_empty() {
                return Err(DriverError::DuplicatePoint { run });
            }
            Ok(StepOutcome::NewPoint {
                x_on_cube: x,
                iter: total + 1,
            })
        }
        None if status.converged() => {
            // In component mode all m rows of a point share x_on_cube; the
            // optimum is the primary row.
            let matches: Vec<I> = hist
                .find_exact(&x_opt)
                .into_iter()
                .filter(|&i| hist[i].is_primary())
                .collect();
            if matches.len() != 1 {
                return Err(DriverError::AmbiguousOptimum {
                    run,
                    count: matches.len(),
                });
            }
            Ok(StepOutcome::Converged {
                opt_row: matches[0],
                members,
            })
        }
        None if status == ExitStatus::Failed => Ok(StepOutcome::Failed),
        None => Err(DriverError::NoNewPoint { run }),
    }
}

/// Per-driver-step state: the run's cached evaluations, the replay cursor,
/// and the capture slot for the first novel query.
pub(crate) struct Replay {
    run: RunId,
    xs: Vec<Col<E>>,
    fs: Vec<E>,
    fvecs: Option<Vec<Col<E>>>,
    pt_in_run: I,
    pub(crate) x_new: Option<Col<E>>,
}

impl Replay {
    fn from_history(
        hist: &History,
        run: RunId,
        members: &[I],
        needs_residual: bool,
        component: Option<&ComponentMode>,
    ) -> Result<Self, DriverError> {
        let xs: Vec<Col<E>> = members.iter().map(|&i| hist[i].x_on_cube.clone()).collect();
        let fs: Vec<E> = members.iter().map(|&i| hist[i].f).collect();

        let fvecs = if !needs_residual {
            None
        } else if let Some(mode) = component {
            // Assemble each member's residual from its sibling component
            // rows.
            let mut by_component: HashMap<(I, I), E> = HashMap::new();
            for row in hist.rows() {
                if let EvalData::Component {
                    obj_component,
                    pt_id,
                    f_i,
                } = row.eval
                {
                    by_component.insert((pt_id, obj_component), f_i);
                }
            }

            let mut assembled = Vec::with_capacity(members.len());
            for (eval, &i) in members.iter().enumerate() {
                let Some(pt_id) = hist[i].pt_id() else {
                    return Err(DriverError::MissingResidual { run, eval });
                };
                let mut fvec = Col::<E>::zeros(mode.components);
                for c in 0..mode.components {
                    match by_component.get(&(pt_id, c)) {
                        Some(&f_i) => fvec[c] = f_i,
                        None => return Err(DriverError::MissingResidual { run, eval }),
                    }
                }
                assembled.push(fvec);
            }
            Some(assembled)
        } else {
            let mut stored = Vec::with_capacity(members.len());
            for (eval, &i) in members.iter().enumerate() {
                match &hist[i].eval {
                    EvalData::Scalar { fvec: Some(fvec) } => stored.push(fvec.clone()),
                    _ => return Err(DriverError::MissingResidual { run, eval }),
                }
            }
            Some(stored)
        };

        Ok(Self {
            run,
            xs,
            fs,
            fvecs,
            pt_in_run: 0,
            x_new: None,
        })
    }

    fn total(&self) -> I {
        self.xs.len()
    }

    /// Advances the replay cursor: `Some(k)` answers from stored step `k`,
    /// `None` means the query lies beyond the stored prefix.
    fn step(&mut self, x: ColRef<'_, E>) -> Result<Option<I>, DriverError> {
        let k = self.pt_in_run;
        self.pt_in_run += 1;

        if k < self.total() {
            if !vector_ops::all_close(x, self.xs[k].as_ref(), MATCH_TOL) {
                return Err(DriverError::ReplayMismatch { run: self.run, eval: k });
            }
            Ok(Some(k))
        } else {
            if k == self.total() {
                self.x_new = Some(x.to_owned());
            }
            // Queries past the capture are ignored.
            Ok(None)
        }
    }
}

impl RunObjective for Replay {
    fn scalar(&mut self, x: ColRef<'_, E>) -> Result<E, DriverError> {
        Ok(match self.step(x)? {
            Some(k) => self.fs[k],
            None => E::from(0.),
        })
    }

    fn residual(&mut self, x: ColRef<'_, E>) -> Result<Col<E>, DriverError> {
        let step = self.step(x)?;
        let fvecs = match &self.fvecs {
            Some(fvecs) => fvecs,
            None => {
                return Err(DriverError::MissingResidual {
                    run: self.run,
                    eval: self.pt_in_run - 1,
                });
            }
        };
        Ok(match step {
            Some(k) => fvecs[k].clone(),
            None => Col::<E>::zeros(fvecs[0].nrows()),
        })
    }
}
