//! Uniform exploration samples that top the output batch up to the batch
//! floor.

use faer::Col;
use rand::Rng;
use rand::rngs::StdRng;

use crate::history::{ComponentMode, EvalData, HistoryRow};
use crate::{E, I};

/// Maps a unit-cube point back to the original domain.
pub(crate) fn scale_to_domain(x_on_cube: &Col<E>, lb: &Col<E>, ub: &Col<E>) -> Col<E> {
    Col::from_fn(lb.nrows(), |i| {
        x_on_cube[i] * (ub[i] - lb[i]) + lb[i]
    })
}

/// Draws uniform points until at least `deficit` rows have been appended.
/// In component mode each drawn point is replicated once per residual
/// component, sharing a fresh logical-point id.
pub(crate) fn append_uniform_samples(
    rng: &mut StdRng,
    batch: &mut Vec<HistoryRow>,
    len_hist: I,
    deficit: I,
    lb: &Col<E>,
    ub: &Col<E>,
    component: Option<&ComponentMode>,
) {
    let n = lb.nrows();
    let target = batch.len() + deficit;

    while batch.len() < target {
        let x_on_cube = Col::from_fn(n, |_| rng.gen_range(0.0..1.0));
        let x = scale_to_domain(&x_on_cube, lb, ub);

        match component {
            None => {
                let sim_id = len_hist + batch.len();
                let mut row = HistoryRow::new(
                    x,
                    x_on_cube,
                    sim_id,
                    false,
                    EvalData::Scalar { fvec: None },
                );
                row.priority = rng.gen_range(0.0..1.0);
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
                        false,
                        EvalData::Component {
                            obj_component: c,
                            pt_id,
                            f_i: E::from(0.),
                        },
                    );
                    row.priority = rng.gen_range(0.0..1.0);
                    batch.push(row);
                }
            }
        }
    }
}
