//! With an empty history the generator is a pure uniform sampler.

use faer::Col;

use crate::generator::{Aposmm, Column};
use crate::history::History;
use crate::options::Options;
use crate::runs::ACTIVE_RUNS_FILE;

fn camel_bounds(options: &mut Options) {
    options
        .set_option("lb", Col::from_fn(2, |i| [-3.0, -2.0][i]))
        .unwrap();
    options
        .set_option("ub", Col::from_fn(2, |i| [3.0, 2.0][i]))
        .unwrap();
}

#[test]
fn test_first_batch_is_uniform_sampling_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = Options::new();
    camel_bounds(&mut options);
    options.set_option("rk_const", 1.0).unwrap();
    options.set_option("initial_sample", 500usize).unwrap();
    options.set_option("min_batch_size", 500usize).unwrap();
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
    ];

    let output = generator.ask(&mut hist, &gen_out).unwrap();

    assert!(output.updated.is_empty());
    assert_eq!(output.new_rows.len(), 500);

    for (k, row) in output.new_rows.iter().enumerate() {
        assert_eq!(row.sim_id, k);
        assert!(!row.local_pt);
        assert!(!row.returned);
        for i in 0..2 {
            let (lb, ub) = ([-3.0, -2.0][i], [3.0, 2.0][i]);
            assert!(row.x[i] >= lb && row.x[i] < ub);
            assert!(row.x_on_cube[i] >= 0.0 && row.x_on_cube[i] < 1.0);
            // Cube mapping round-trip.
            assert!((row.x_on_cube[i] * (ub - lb) + lb - row.x[i]).abs() < 1e-12);
        }
    }

    // No local work happened, so no run state was written.
    assert!(!dir.path().join(ACTIVE_RUNS_FILE).exists());
}

#[test]
fn test_seeded_streams_are_reproducible() {
    let draw = || {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::new();
        camel_bounds(&mut options);
        options.set_option("rk_const", 1.0).unwrap();
        options.set_option("initial_sample", 10usize).unwrap();
        options.set_option("min_batch_size", 10usize).unwrap();
        options.set_option("seed", 7u64).unwrap();
        options
            .set_option("run_state_dir", dir.path().to_str().unwrap().to_string())
            .unwrap();

        let mut generator = Aposmm::new(&options).unwrap();
        let mut hist = History::new();
        let output = generator.ask(&mut hist, &[Column::X]).unwrap();
        output
            .new_rows
            .iter()
            .map(|row| (row.x[0], row.x[1]))
            .collect::<Vec<_>>()
    };

    assert_eq!(draw(), draw());
}
