//! The shared history of all proposed points.
//!
//! The manager owns the [`History`] and grows it with the rows the generator
//! returns; the generator mutates derived fields in place and reports which
//! rows it touched. Rows are append-only.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use faer::Col;

use crate::{E, I};

/// Identifier of one local-optimization run: a column of the row-by-run
/// iteration matrix.
pub type RunId = I;

/// Fields whose presence depends on the evaluation regime.
#[derive(Debug, Clone)]
pub enum EvalData {
    /// One evaluation yields the full objective (and optionally the full
    /// residual vector) of one point.
    Scalar { fvec: Option<Col<E>> },
    /// One evaluation yields a single residual component; the `m` rows of a
    /// logical point share a `pt_id`.
    Component { obj_component: I, pt_id: I, f_i: E },
}

/// Component-mode configuration: residual length and the reduction applied
/// to a completed residual vector.
#[derive(Clone, Copy)]
pub struct ComponentMode {
    pub components: I,
    pub combine: fn(&Col<E>) -> E,
}

/// One row of the history.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    /// Point in the original bounded domain.
    pub x: Col<E>,
    /// The same point rescaled to the unit cube.
    pub x_on_cube: Col<E>,
    /// The row's index in the history.
    pub sim_id: I,
    /// Manager-facing dispatch priority.
    pub priority: E,
    /// Whether the point came from a local run rather than uniform sampling.
    pub local_pt: bool,
    /// Flips true the first time the generator processes the returned value.
    pub known_to_aposmm: bool,
    /// Set by the manager once the evaluation is complete.
    pub returned: bool,
    /// Objective value; written by the manager (and, in component mode, by
    /// the generator when a logical point completes).
    pub f: E,
    /// Mode-dependent evaluation data.
    pub eval: EvalData,
    /// Minimum distance from `x_on_cube` to any face of the unit cube.
    pub dist_to_unit_bounds: E,
    /// Distance to the closest sample point with strictly smaller `f`.
    pub dist_to_better_s: E,
    /// Row id of that sample point, if any.
    pub ind_of_better_s: Option<I>,
    /// Distance to the closest local point with strictly smaller `f`.
    pub dist_to_better_l: E,
    /// Row id of that local point, if any.
    pub ind_of_better_l: Option<I>,
    /// Whether this row has ever seeded a local run.
    pub started_run: bool,
    /// Number of active runs this row currently belongs to.
    pub num_active_runs: I,
    /// Sparse row of the iteration matrix: run id to one plus the 0-based
    /// step at which this row was produced within that run.
    pub run_iters: BTreeMap<RunId, I>,
    /// Set once a run converges and declares this row its minimum.
    pub local_min: bool,
}

impl HistoryRow {
    /// A fresh row for a newly proposed point: derived fields at their
    /// sentinels, run bookkeeping empty.
    pub fn new(x: Col<E>, x_on_cube: Col<E>, sim_id: I, local_pt: bool, eval: EvalData) -> Self {
        Self {
            x,
            x_on_cube,
            sim_id,
            priority: E::from(0.),
            local_pt,
            known_to_aposmm: false,
            returned: false,
            f: E::INFINITY,
            eval,
            dist_to_unit_bounds: E::INFINITY,
            dist_to_better_s: E::INFINITY,
            ind_of_better_s: None,
            dist_to_better_l: E::INFINITY,
            ind_of_better_l: None,
            started_run: false,
            num_active_runs: 0,
            run_iters: BTreeMap::new(),
            local_min: false,
        }
    }

    /// The residual component this row represents, in component mode.
    pub fn obj_component(&self) -> Option<I> {
        match self.eval {
            EvalData::Component { obj_component, .. } => Some(obj_component),
            EvalData::Scalar { .. } => None,
        }
    }

    /// The logical-point id shared by the `m` rows of one point, in
    /// component mode.
    pub fn pt_id(&self) -> Option<I> {
        match self.eval {
            EvalData::Component { pt_id, .. } => Some(pt_id),
            EvalData::Scalar { .. } => None,
        }
    }

    /// Whether this row represents component 0 of its logical point (or any
    /// row at all outside component mode).
    pub fn is_primary(&self) -> bool {
        self.obj_component().is_none_or(|c| c == 0)
    }
}

/// Append-only table of history rows.
#[derive(Debug, Default)]
pub struct History {
    rows: Vec<HistoryRow>,
}

impl History {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> I {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    /// Appends one row; the manager calls this with the rows the generator
    /// returned.
    pub fn push(&mut self, row: HistoryRow) {
        self.rows.push(row);
    }

    pub fn append(&mut self, rows: impl IntoIterator<Item = HistoryRow>) {
        self.rows.extend(rows);
    }

    /// Rows the generator has not yet processed, in ascending order.
    pub fn unknown_rows(&self) -> Vec<I> {
        (0..self.rows.len())
            .filter(|&i| !self.rows[i].known_to_aposmm)
            .collect()
    }

    /// Number of completed sample evaluations; in component mode a logical
    /// point counts once.
    pub fn n_s(&self, component_mode: bool) -> I {
        self.rows
            .iter()
            .filter(|row| {
                !row.local_pt && row.returned && (!component_mode || row.is_primary())
            })
            .count()
    }

    /// Whether any row participates in any run.
    pub fn has_run_entries(&self) -> bool {
        self.rows.iter().any(|row| !row.run_iters.is_empty())
    }

    /// The next unused run id.
    pub fn next_run_id(&self) -> RunId {
        self.rows
            .iter()
            .flat_map(|row| row.run_iters.keys().copied())
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Rows belonging to the given run, ordered by their step within the
    /// run.
    pub fn rows_in_run(&self, run: RunId) -> Vec<I> {
        let mut members: Vec<(I, I)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| row.run_iters.get(&run).map(|&iter| (iter, i)))
            .collect();
        members.sort_unstable();
        members.into_iter().map(|(_, i)| i).collect()
    }

    /// Rows whose `x_on_cube` equals `x` exactly.
    pub fn find_exact(&self, x: &Col<E>) -> Vec<I> {
        (0..self.rows.len())
            .filter(|&i| self.rows[i].x_on_cube == *x)
            .collect()
    }
}

impl Index<I> for History {
    type Output = HistoryRow;

    fn index(&self, i: I) -> &HistoryRow {
        &self.rows[i]
    }
}

impl IndexMut<I> for History {
    fn index_mut(&mut self, i: I) -> &mut HistoryRow {
        &mut self.rows[i]
    }
}
