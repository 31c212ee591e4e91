//! Decides which history rows should seed new local-optimization runs.
//!
//! A row qualifies when no better point of the relevant class lies within
//! the critical radius `r_k`, it has not started a run, it keeps the
//! required clearance from the cube boundary and from known minima, and (for
//! local points) it is idle and not itself a minimum. These are conditions
//! S1–S5 and L1–L7 of the multilevel-single-linkage start rules; the
//! r_k-ascent condition L8 is unsupported.

use crate::history::History;
use crate::linalg::vector_ops;
use crate::{E, I};

/// Critical radius: shrinks as the number of completed sample evaluations
/// grows, so starts become increasingly selective.
pub fn calc_rk(n: I, n_s: I, rk_const: E, lhs_divisions: I) -> E {
    if n_s == 0 {
        return E::INFINITY;
    }

    if lhs_divisions == 0 {
        rk_const * ((n_s as E).ln() / n_s as E).powf(E::from(1.) / n as E)
    } else {
        let k = n_s / lhs_divisions;
        if k <= 1 {
            E::INFINITY
        } else {
            rk_const * ((k as E).ln() / k as E).powf(E::from(1.) / n as E)
        }
    }
}

/// Thresholds governing where runs may start.
#[derive(Debug, Clone, Copy)]
pub struct StartCriteria {
    pub rk_const: E,
    pub lhs_divisions: I,
    /// Minimum clearance from the cube boundary (L4).
    pub mu: E,
    /// Minimum clearance from identified minima (L5).
    pub nu: E,
    /// Only sample points in the lower `gamma_quantile` of objective values
    /// may start runs.
    pub gamma_quantile: E,
}

/// Returns the rows that should seed new runs: sample seeds satisfying
/// S1–S5 followed by local seeds satisfying L1–L7.
pub fn decide_where_to_start_localopt(hist: &History, n_s: I, crit: &StartCriteria) -> Vec<I> {
    if hist.is_empty() {
        return Vec::new();
    }

    let n = hist[0].x_on_cube.nrows();
    let r_k = calc_rk(n, n_s, crit.rk_const, crit.lhs_divisions);

    let minima: Vec<I> = (0..hist.len()).filter(|&i| hist[i].local_min).collect();

    // Conditions shared by both classes: returned value, no better sample
    // within r_k (L2), never seeded (L3), boundary clearance (L4), and
    // clearance from known minima (L5).
    let common = |i: I| -> bool {
        let row = &hist[i];
        row.returned
            && row.dist_to_better_s > r_k
            && !row.started_run
            && row.dist_to_unit_bounds >= crit.mu
            && (crit.nu <= E::from(0.)
                || minima.iter().all(|&m| {
                    vector_ops::euclidean_dist(
                        row.x_on_cube.as_ref(),
                        hist[m].x_on_cube.as_ref(),
                    ) >= crit.nu
                }))
    };

    // Quantile over the objective values of every sample row; rows whose
    // evaluation has not returned carry their +inf sentinel and sort last.
    let cut_off = if crit.gamma_quantile < E::from(1.) {
        let mut sample_f: Vec<E> = hist
            .rows()
            .iter()
            .filter(|row| !row.local_pt)
            .map(|row| row.f)
            .collect();
        if sample_f.is_empty() {
            E::INFINITY
        } else {
            sample_f.sort_by(E::total_cmp);
            let idx = (crit.gamma_quantile * (sample_f.len() - 1) as E).floor() as I;
            sample_f[idx]
        }
    } else {
        E::INFINITY
    };

    let mut starts = Vec::new();

    for i in 0..hist.len() {
        let row = &hist[i];
        // Sample seeds: S2–S5 plus the quantile cut, then S1.
        if !row.local_pt
            && row.f <= cut_off
            && row.f.is_finite()
            && common(i)
            && row.dist_to_better_l > r_k
        {
            starts.push(i);
        }
    }

    for i in 0..hist.len() {
        let row = &hist[i];
        // Local seeds: L1 plus L6/L7 on top of the shared conditions.
        if row.local_pt
            && row.dist_to_better_l > r_k
            && row.f.is_finite()
            && common(i)
            && row.num_active_runs == 0
            && !row.local_min
        {
            starts.push(i);
        }
    }

    starts
}
