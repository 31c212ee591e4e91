//! A miniature manager: evaluates the batches the generator proposes and
//! grows the shared history.

use std::collections::HashMap;

use faer::Col;

use crate::generator::GenOutput;
use crate::history::{EvalData, History};
use crate::linalg::vector_ops;
use crate::{E, I};

pub(crate) fn six_hump_camel(x: &Col<E>) -> E {
    let (x1, x2) = (x[0], x[1]);
    (4.0 - 2.1 * x1.powi(2) + x1.powi(4) / 3.0) * x1.powi(2)
        + x1 * x2
        + (-4.0 + 4.0 * x2.powi(2)) * x2.powi(2)
}

pub(crate) const CAMEL_MINIMA: [[E; 2]; 6] = [
    [-0.089842, 0.712656],
    [0.089842, -0.712656],
    [-1.70361, 0.796084],
    [1.70361, -0.796084],
    [-1.6071, -0.568651],
    [1.6071, 0.568651],
];

/// Evaluates every new row with the scalar objective and appends it to the
/// history as returned.
pub(crate) fn dispatch_scalar(hist: &mut History, output: GenOutput, f: impl Fn(&Col<E>) -> E) {
    for mut row in output.new_rows {
        row.f = f(&row.x);
        row.returned = true;
        hist.push(row);
    }
}

/// Evaluates every new row's residual component and appends it as returned.
pub(crate) fn dispatch_components(
    hist: &mut History,
    output: GenOutput,
    residual: impl Fn(&Col<E>, I) -> E,
) {
    for mut row in output.new_rows {
        if let EvalData::Component {
            obj_component, f_i, ..
        } = &mut row.eval
        {
            *f_i = residual(&row.x, *obj_component);
        }
        row.returned = true;
        hist.push(row);
    }
}

/// Structural invariants that must hold for any history the generator has
/// worked on.
pub(crate) fn check_invariants(hist: &History) {
    let mut iters_per_run: HashMap<I, Vec<I>> = HashMap::new();

    for i in 0..hist.len() {
        let row = &hist[i];

        // Better-pointers refer to strictly better rows of the right class
        // at exactly the recorded distance.
        if let Some(j) = row.ind_of_better_s {
            assert!(!hist[j].local_pt);
            // A row's own pointer may target an equal value; pointers set by
            // a later arrival are strictly better.
            assert!(hist[j].f <= row.f);
            let d = vector_ops::euclidean_dist(row.x_on_cube.as_ref(), hist[j].x_on_cube.as_ref());
            assert!((d - row.dist_to_better_s).abs() < 1e-12);
        }
        if let Some(j) = row.ind_of_better_l {
            assert!(hist[j].local_pt);
            assert!(hist[j].f <= row.f);
            let d = vector_ops::euclidean_dist(row.x_on_cube.as_ref(), hist[j].x_on_cube.as_ref());
            assert!((d - row.dist_to_better_l).abs() < 1e-12);
        }

        // A declared minimum is no longer in any active run.
        if row.local_min {
            assert_eq!(row.num_active_runs, 0, "row {i} is a minimum in an active run");
        }

        for (&run, &iter) in &row.run_iters {
            assert!(iter >= 1);
            if iter == 1 {
                assert!(row.started_run, "row {i} seeds run {run} but is not marked");
            }
            iters_per_run.entry(run).or_default().push(iter);
        }
    }

    // Within a run every iteration number appears exactly once and the
    // numbers form a contiguous prefix.
    for (run, mut iters) in iters_per_run {
        iters.sort_unstable();
        for (k, iter) in iters.iter().enumerate() {
            assert_eq!(*iter, k + 1, "run {run} has a gap or duplicate step");
        }
    }
}
