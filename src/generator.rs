//! Generator entry point: one APOSMM step per manager invocation.
//!
//! Each call absorbs newly returned evaluations, decides which rows should
//! seed new local runs, advances every active run by at most one new point,
//! persists the active-run set, and tops the outgoing batch up with uniform
//! samples.

use std::collections::BTreeSet;
use std::path::PathBuf;

use derive_more::{Display, Error};
use faer::Col;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::distance::update_history_dist;
use crate::driver::{DriverError, StepOutcome, advance_run};
use crate::history::{ComponentMode, EvalData, History, HistoryRow, RunId};
use crate::localopt::{LocalOptMethod, LocalSolver};
use crate::options::Options;
use crate::runs::{RegistryError, RunRegistry};
use crate::sampling::{append_uniform_samples, scale_to_domain};
use crate::startpoints::{StartCriteria, decide_where_to_start_localopt};
use crate::{E, I};

/// Columns a manager can request in the outgoing batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    X,
    XOnCube,
    SimId,
    Priority,
    LocalPt,
    KnownToAposmm,
    DistToUnitBounds,
    DistToBetterL,
    DistToBetterS,
    IndOfBetterL,
    IndOfBetterS,
    StartedRun,
    NumActiveRuns,
    IterPlus1InRunId,
    LocalMin,
    PtId,
    ObjComponent,
    F,
    Fvec,
}

impl Column {
    /// Columns that only exist in component mode.
    fn component_only(self) -> bool {
        matches!(self, Column::PtId | Column::ObjComponent)
    }
}

#[derive(Debug, Display, Error)]
pub enum GeneratorError {
    #[display("option {name:?} is invalid: {reason}")]
    InvalidOption {
        #[error(not(source))]
        name: &'static str,
        reason: &'static str,
    },

    #[display("column {column:?} requires component mode")]
    SchemaMismatch {
        #[error(not(source))]
        column: Column,
    },

    #[display("history length {len} is not a multiple of {components} components")]
    MisalignedHistory {
        #[error(not(source))]
        len: I,
        components: I,
    },

    #[display("{source}")]
    Registry { source: RegistryError },

    #[display("{source}")]
    Driver { source: DriverError },
}

impl From<RegistryError> for GeneratorError {
    fn from(source: RegistryError) -> Self {
        GeneratorError::Registry { source }
    }
}

impl From<DriverError> for GeneratorError {
    fn from(source: DriverError) -> Self {
        GeneratorError::Driver { source }
    }
}

/// One invocation's output: the existing rows whose fields changed, then
/// the newly proposed rows.
#[derive(Debug)]
pub struct GenOutput {
    /// Touched existing rows, as `(index, current contents)` pairs in
    /// ascending index order.
    pub updated: Vec<(I, HistoryRow)>,
    /// New rows for the manager to evaluate, with `sim_id` continuing the
    /// history.
    pub new_rows: Vec<HistoryRow>,
}

/// The generator. Holds everything that must survive between invocations
/// on the caller's side: validated options, the sampling stream, and the
/// failure counter. The active-run set itself lives in `active_runs.txt`.
pub struct Aposmm {
    lb: Col<E>,
    ub: Col<E>,
    initial_sample: I,
    crit: StartCriteria,
    method: LocalOptMethod,
    min_batch_size: I,
    component: Option<ComponentMode>,
    options: Options,
    rng: StdRng,
    run_state_dir: PathBuf,
    solver_failures: I,
}

impl Aposmm {
    /// Validates the options and builds a generator.
    pub fn new(options: &Options) -> Result<Self, GeneratorError> {
        let lb = options.get_option::<Col<E>>("lb").unwrap_or(Col::zeros(0));
        let ub = options.get_option::<Col<E>>("ub").unwrap_or(Col::zeros(0));
        if lb.nrows() == 0 {
            return Err(GeneratorError::InvalidOption {
                name: "lb",
                reason: "bounds must be set",
            });
        }
        if lb.nrows() != ub.nrows() {
            return Err(GeneratorError::InvalidOption {
                name: "ub",
                reason: "bounds must have equal lengths",
            });
        }
        if (0..lb.nrows()).any(|i| lb[i] >= ub[i]) {
            return Err(GeneratorError::InvalidOption {
                name: "lb",
                reason: "lower bounds must be strictly below upper bounds",
            });
        }

        let rk_const = options.get_option::<E>("rk_const").unwrap_or(0.0);
        if rk_const <= 0.0 {
            return Err(GeneratorError::InvalidOption {
                name: "rk_const",
                reason: "the critical-radius constant must be positive",
            });
        }

        let gamma_quantile = options.get_option::<E>("gamma_quantile").unwrap_or(1.0);
        if gamma_quantile <= 0.0 || gamma_quantile > 1.0 {
            return Err(GeneratorError::InvalidOption {
                name: "gamma_quantile",
                reason: "the quantile must lie in (0, 1]",
            });
        }

        let mu = options.get_option::<E>("mu").unwrap_or(0.0);
        let nu = options.get_option::<E>("nu").unwrap_or(0.0);
        if mu < 0.0 || nu < 0.0 {
            return Err(GeneratorError::InvalidOption {
                name: "mu",
                reason: "clearance thresholds must be nonnegative",
            });
        }

        let component = if options
            .get_option::<bool>("single_component_at_a_time")
            .unwrap_or(false)
        {
            let components = options.get_option::<usize>("components").unwrap_or(0);
            if components == 0 {
                return Err(GeneratorError::InvalidOption {
                    name: "components",
                    reason: "component mode requires the residual length",
                });
            }
            let combine = options
                .get_option::<fn(&Col<E>) -> E>("combine_component_func")
                .unwrap_or(crate::options::sum_of_squares);
            Some(ComponentMode {
                components,
                combine,
            })
        } else {
            None
        };

        let seed = options.get_option::<u64>("seed").unwrap_or(0);
        let run_state_dir =
            PathBuf::from(options.get_option::<String>("run_state_dir").unwrap_or_else(|| ".".to_string()));

        Ok(Self {
            lb,
            ub,
            initial_sample: options.get_option::<usize>("initial_sample").unwrap_or(0),
            crit: StartCriteria {
                rk_const,
                lhs_divisions: options.get_option::<usize>("lhs_divisions").unwrap_or(0),
                mu,
                nu,
                gamma_quantile,
            },
            method: options
                .get_option::<LocalOptMethod>("localopt_method")
                .unwrap_or(LocalOptMethod::NelderMead),
            min_batch_size: options.get_option::<usize>("min_batch_size").unwrap_or(1),
            component,
            options: options.clone(),
            rng: StdRng::seed_from_u64(seed),
            run_state_dir,
            solver_failures: 0,
        })
    }

    /// Number of swallowed solver failures so far. Failed steps leave their
    /// run active without advancing it, so a growing counter points at a
    /// run that may never complete.
    pub fn solver_failures(&self) -> I {
        self.solver_failures
    }

    /// One generator step: absorb returns, start and advance runs, top up
    /// with samples, and report changed plus new rows.
    pub fn ask(
        &mut self,
        hist: &mut History,
        gen_out: &[Column],
    ) -> Result<GenOutput, GeneratorError> {
        for &column in gen_out {
            if column.component_only() && self.component.is_none() {
                return Err(GeneratorError::SchemaMismatch { column });
            }
        }
        if let Some(mode) = &self.component {
            if hist.len() % mode.components != 0 {
                return Err(GeneratorError::MisalignedHistory {
                    len: hist.len(),
                    components: mode.components,
                });
            }
        }

        let component_mode = self.component.is_some();
        let n_s = hist.n_s(component_mode);

        let mut touched: BTreeSet<I> = BTreeSet::new();
        let mut new_rows: Vec<HistoryRow> = Vec::new();

        if n_s >= self.initial_sample {
            touched.extend(update_history_dist(hist, self.component.as_ref()));

            let seeds = decide_where_to_start_localopt(hist, n_s, &self.crit);
            let mut registry = RunRegistry::open(&self.run_state_dir, hist)?;
            for &seed in &seeds {
                let run = hist.next_run_id();
                let row = &mut hist[seed];
                row.started_run = true;
                row.num_active_runs += 1;
                row.run_iters.insert(run, 1);
                registry.insert(run);
                touched.insert(seed);
            }
            debug!(
                seeds = seeds.len(),
                active_runs = registry.len(),
                n_s,
                "starting local runs"
            );

            let solver = LocalSolver::from_options(self.method, &self.options);
            let mut finished: Vec<RunId> = Vec::new();

            for run in registry.ids() {
                match advance_run(hist, run, &solver, self.component.as_ref())? {
                    StepOutcome::NewPoint { x_on_cube, iter } => {
                        self.append_local_point(&mut new_rows, hist.len(), x_on_cube, run, iter);
                    }
                    StepOutcome::Converged { opt_row, members } => {
                        hist[opt_row].local_min = true;
                        touched.insert(opt_row);
                        for i in members {
                            hist[i].num_active_runs = hist[i].num_active_runs.saturating_sub(1);
                            touched.insert(i);
                        }
                        finished.push(run);
                    }
                    StepOutcome::Waiting => {}
                    StepOutcome::Failed => {
                        self.solver_failures += 1;
                        warn!(run, "local solver failed; run left active");
                    }
                }
            }

            for run in finished {
                registry.remove(run);
            }
            registry.persist()?;
        }

        if new_rows.len() < self.min_batch_size {
            let deficit = self.min_batch_size - new_rows.len();
            append_uniform_samples(
                &mut self.rng,
                &mut new_rows,
                hist.len(),
                deficit,
                &self.lb,
                &self.ub,
                self.component.as_ref(),
            );
        }

        let updated = touched.into_iter().map(|i| (i, hist[i].clone())).collect();
        Ok(GenOutput { updated, new_rows })
    }

    /// Appends the solver's next query to the batch: one row, or the full
    /// component family in component mode.
    fn append_local_point(
        &self,
        batch: &mut Vec<HistoryRow>,
        len_hist: I,
        x_on_cube: Col<E>,
        run: RunId,
        iter: I,
    ) {
        let x = scale_to_domain(&x_on_cube, &self.lb, &self.ub);

        match &self.component {
            None => {
                let sim_id = len_hist + batch.len();
                let mut row = HistoryRow::new(
                    x,
                    x_on_cube,
                    sim_id,
                    true,
                    EvalData::Scalar { fvec: None },
                );
                row.priority = E::from(1.);
                row.run_iters.insert(run, iter);
                row.num_active_runs = 1;
                batch.push(row);
            }
            Some(mode) => {
                let pt_id = (len_hist + batch.len()) / mode.components;
                for c in 0..mode.components {
                    let sim_id = len_hist + batch.len();
                    let mut row = HistoryRow::new(
                        x.clone(),
                        x_on_cube.clone(),
                        sim_id,
                        true,
                        EvalData::Component {
                            obj_component: c,
                            pt_id,
                            f_i: E::from(0.),
                        },
                    );
                    row.priority = E::from(1.);
                    if c == 0 {
                        row.run_iters.insert(run, iter);
                        row.num_active_runs = 1;
                    }
                    batch.push(row);
                }
            }
        }
    }
}

/// One-shot form of the generator interface.
///
/// Continuity of the sampling stream normally comes from holding an
/// [`Aposmm`] value across invocations; this wrapper instead derives the
/// stream from the seed and the current history length, so repeated calls
/// still draw fresh samples.
pub fn aposmm(
    hist: &mut History,
    gen_out: &[Column],
    options: &Options,
) -> Result<GenOutput, GeneratorError> {
    let mut generator = Aposmm::new(options)?;
    let seed = options.get_option::<u64>("seed").unwrap_or(0);
    generator.rng = StdRng::seed_from_u64(seed.wrapping_add(hist.len() as u64));
    generator.ask(hist, gen_out)
}
