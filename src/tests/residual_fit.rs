//! Exponential-decay curve fit evaluated one residual component at a time,
//! driven by the trust-region least-squares method.

use faer::Col;

use crate::generator::{Aposmm, Column};
use crate::history::History;
use crate::localopt::LocalOptMethod;
use crate::options::Options;
use crate::tests::support::{check_invariants, dispatch_components};
use crate::{E, I};

const M: I = 214;

/// Residual of an exponential-decay model against a fixed ground-truth
/// curve, one component per evaluation.
fn decay_residual(x: &Col<E>, k: I) -> E {
    let t = 0.1 + 0.9 * k as E / M as E;
    let truth = (-0.15 * t).exp() / (0.3 + 0.2 * t);
    (-x[0] * t).exp() / (x[1] + x[2] * t) - truth
}

#[test]
fn test_component_mode_residual_fit() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = Options::new();
    options
        .set_option("lb", Col::from_fn(3, |_| -2.0))
        .unwrap();
    options.set_option("ub", Col::from_fn(3, |_| 2.0)).unwrap();
    options.set_option("initial_sample", 3usize).unwrap();
    options.set_option("min_batch_size", 1usize).unwrap();
    options.set_option("rk_const", 2.0).unwrap();
    options
        .set_option("localopt_method", LocalOptMethod::TrustRegionLs)
        .unwrap();
    options.set_option("delta_0_mult", 0.5).unwrap();
    options.set_option("grtol", 1e-4).unwrap();
    options.set_option("gatol", 1e-4).unwrap();
    options
        .set_option("single_component_at_a_time", true)
        .unwrap();
    options.set_option("components", M).unwrap();
    options.set_option("seed", 1u64).unwrap();
    options
        .set_option("run_state_dir", dir.path().to_str().unwrap().to_string())
        .unwrap();

    let mut generator = Aposmm::new(&options).unwrap();
    let mut hist = History::new();
    let gen_out = [
        Column::X,
        Column::XOnCube,
        Column::SimId,
        Column::Priority,
        Column::LocalPt,
        Column::PtId,
        Column::ObjComponent,
    ];

    // A small budget of logical evaluations: enough to sample, seed a run,
    // and drive it through its first few model-building queries.
    for _ in 0..12 {
        let output = generator.ask(&mut hist, &gen_out).unwrap();
        assert!(!output.new_rows.is_empty());
        assert_eq!(output.new_rows.len() % M, 0);
        dispatch_components(&mut hist, output, decay_residual);
    }

    // The combined objective landed on component-0 rows only.
    let combined = hist
        .rows()
        .iter()
        .filter(|row| row.returned && row.is_primary() && row.f.is_finite())
        .count();
    assert!(combined >= 3);
    assert!(
        hist.rows()
            .iter()
            .filter(|row| !row.is_primary())
            .all(|row| !row.f.is_finite())
    );

    // A local run started and asked for new points.
    assert!(hist.rows().iter().any(|row| row.local_pt));

    check_invariants(&hist);
}
