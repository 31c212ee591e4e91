//! Maintains the derived distance fields of the history as new evaluations
//! arrive.
//!
//! For every newly returned point the maintainer records its distance to the
//! cube boundary, shortens the nearest-better distances of points it
//! improves on, and finds its own nearest better-or-equal sample and local
//! points. In component mode it first folds completed residual components
//! into a single objective value on the component-0 row.

use std::collections::{BTreeMap, BTreeSet};

use faer::Col;

use crate::history::{ComponentMode, History};
use crate::linalg::vector_ops;
use crate::{E, I};

/// Absorbs every row not yet known to the generator and returns the
/// indices of every row whose fields changed, deduplicated and in
/// ascending order.
///
/// All unseen rows are marked known each invocation, returned or not;
/// distances are then updated for the newly known rows that have a
/// returned value.
pub fn update_history_dist(hist: &mut History, component: Option<&ComponentMode>) -> Vec<I> {
    let new_inds = hist.unknown_rows();

    if let Some(mode) = component {
        combine_completed_points(hist, mode, &new_inds);
    }

    for &i in &new_inds {
        hist[i].known_to_aposmm = true;
    }

    // Candidate set: returned rows, restricted to component-0 rows in
    // component mode, fixed before any distances are updated.
    let candidates: Vec<I> = (0..hist.len())
        .filter(|&i| {
            let row = &hist[i];
            row.returned && (component.is_none() || row.is_primary())
        })
        .collect();

    let mut touched: BTreeSet<I> = new_inds.iter().copied().collect();

    for &j in &new_inds {
        if candidates.binary_search(&j).is_err() {
            continue;
        }

        hist[j].dist_to_unit_bounds = vector_ops::dist_to_unit_bounds(hist[j].x_on_cube.as_ref());

        let dists: Vec<E> = candidates
            .iter()
            .map(|&i| {
                vector_ops::euclidean_dist(hist[i].x_on_cube.as_ref(), hist[j].x_on_cube.as_ref())
            })
            .collect();

        let f_new = hist[j].f;
        let new_is_local = hist[j].local_pt;

        // Shorten the nearest-better distance of any candidate the new
        // point improves on.
        for (k, &i) in candidates.iter().enumerate() {
            if f_new >= hist[i].f {
                continue;
            }
            let row = &mut hist[i];
            let (dist_slot, ind_slot) = if new_is_local {
                (&mut row.dist_to_better_l, &mut row.ind_of_better_l)
            } else {
                (&mut row.dist_to_better_s, &mut row.ind_of_better_s)
            };
            if dists[k] < *dist_slot {
                *dist_slot = dists[k];
                *ind_slot = Some(j);
                touched.insert(i);
            }
        }

        // Nearest better-or-equal candidate in each class, excluding the
        // point itself.
        let mut best_local: Option<(E, I)> = None;
        let mut best_sample: Option<(E, I)> = None;
        for (k, &i) in candidates.iter().enumerate() {
            if i == j || hist[i].f > f_new {
                continue;
            }
            let slot = if hist[i].local_pt {
                &mut best_local
            } else {
                &mut best_sample
            };
            if slot.is_none_or(|(d, _)| dists[k] < d) {
                *slot = Some((dists[k], i));
            }
        }
        if let Some((d, i)) = best_local {
            hist[j].dist_to_better_l = d;
            hist[j].ind_of_better_l = Some(i);
        }
        if let Some((d, i)) = best_sample {
            hist[j].dist_to_better_s = d;
            hist[j].ind_of_better_s = Some(i);
        }
    }

    touched.into_iter().collect()
}

/// Folds the residual components of every logical point with a newly seen
/// row into its objective value, once all components have returned. The
/// combined value lands on the component-0 row; the other rows keep `+inf`.
fn combine_completed_points(hist: &mut History, mode: &ComponentMode, new_inds: &[I]) {
    let pt_ids: BTreeSet<I> = new_inds.iter().filter_map(|&i| hist[i].pt_id()).collect();
    if pt_ids.is_empty() {
        return;
    }

    // Gather each point's component rows in one pass.
    let mut members: BTreeMap<I, Vec<I>> = BTreeMap::new();
    for i in 0..hist.len() {
        if let Some(pt) = hist[i].pt_id() {
            if pt_ids.contains(&pt) {
                members.entry(pt).or_default().push(i);
            }
        }
    }

    for rows in members.values() {
        if rows.len() != mode.components || rows.iter().any(|&i| !hist[i].returned) {
            continue;
        }

        let mut fvec = Col::<E>::zeros(mode.components);
        let mut primary = None;
        for &i in rows {
            if let crate::history::EvalData::Component {
                obj_component, f_i, ..
            } = hist[i].eval
            {
                fvec[obj_component] = f_i;
                if obj_component == 0 {
                    primary = Some(i);
                }
            }
            hist[i].f = E::INFINITY;
        }
        if let Some(primary) = primary {
            hist[primary].f = (mode.combine)(&fvec);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::history::{EvalData, HistoryRow};
    use crate::options::sum_of_squares;

    use super::*;

    fn sample_row(coords: [E; 2], sim_id: I, f: E) -> HistoryRow {
        let x = Col::from_fn(2, |i| coords[i]);
        let mut row = HistoryRow::new(x.clone(), x, sim_id, false, EvalData::Scalar { fvec: None });
        row.f = f;
        row.returned = true;
        row
    }

    #[test]
    fn test_better_pointers() {
        let mut hist = History::new();
        hist.push(sample_row([0.25, 0.5], 0, 1.0));
        hist.push(sample_row([0.75, 0.5], 1, 0.0));
        hist.push(sample_row([0.25, 0.75], 2, 2.0));

        let touched = update_history_dist(&mut hist, None);
        assert_eq!(touched, vec![0, 1, 2]);

        // Row 0's nearest better sample is row 1 at distance 0.5.
        assert_eq!(hist[0].ind_of_better_s, Some(1));
        assert_relative_eq!(hist[0].dist_to_better_s, 0.5);

        // Row 1 is the best point; no better sample exists.
        assert_eq!(hist[1].ind_of_better_s, None);
        assert!(hist[1].dist_to_better_s.is_infinite());

        // Row 2's nearest better sample is row 0 at distance 0.25.
        assert_eq!(hist[2].ind_of_better_s, Some(0));
        assert_relative_eq!(hist[2].dist_to_better_s, 0.25);

        // Boundary distances.
        assert_relative_eq!(hist[0].dist_to_unit_bounds, 0.25);
        assert_relative_eq!(hist[2].dist_to_unit_bounds, 0.25);

        // Pointer consistency: the recorded distance matches the pointed row.
        for i in 0..hist.len() {
            if let Some(k) = hist[i].ind_of_better_s {
                assert!(hist[k].f < hist[i].f);
                assert_relative_eq!(
                    vector_ops::euclidean_dist(
                        hist[i].x_on_cube.as_ref(),
                        hist[k].x_on_cube.as_ref()
                    ),
                    hist[i].dist_to_better_s
                );
            }
        }
    }

    #[test]
    fn test_distances_shrink_as_points_arrive() {
        let mut hist = History::new();
        hist.push(sample_row([0.25, 0.5], 0, 1.0));
        hist.push(sample_row([0.75, 0.5], 1, 0.0));
        update_history_dist(&mut hist, None);
        let before = hist[0].dist_to_better_s;

        hist.push(sample_row([0.25, 0.625], 2, 0.5));
        let touched = update_history_dist(&mut hist, None);
        assert!(touched.contains(&0));

        // A closer better point arrived; the distance must not grow.
        assert!(hist[0].dist_to_better_s < before);
        assert_eq!(hist[0].ind_of_better_s, Some(2));
    }

    #[test]
    fn test_local_and_sample_classes_tracked_separately() {
        let mut hist = History::new();
        hist.push(sample_row([0.5, 0.5], 0, 1.0));
        let mut local = sample_row([0.5, 0.625], 1, 0.5);
        local.local_pt = true;
        hist.push(local);

        update_history_dist(&mut hist, None);

        assert_eq!(hist[0].ind_of_better_l, Some(1));
        assert_relative_eq!(hist[0].dist_to_better_l, 0.125);
        assert_eq!(hist[0].ind_of_better_s, None);

        // The local row is strictly best, so it has no better point in
        // either class.
        assert_eq!(hist[1].ind_of_better_s, None);
        assert_eq!(hist[1].ind_of_better_l, None);
    }

    #[test]
    fn test_component_combine() {
        let mode = ComponentMode {
            components: 3,
            combine: sum_of_squares,
        };
        let mut hist = History::new();
        for c in 0..3 {
            let x = Col::from_fn(2, |_| 0.5);
            let mut row = HistoryRow::new(
                x.clone(),
                x,
                c,
                false,
                EvalData::Component {
                    obj_component: c,
                    pt_id: 0,
                    f_i: [1.0, 2.0, 2.0][c],
                },
            );
            row.returned = true;
            hist.push(row);
        }

        update_history_dist(&mut hist, Some(&mode));

        assert_eq!(hist[0].f, 9.0);
        assert!(hist[1].f.is_infinite());
        assert!(hist[2].f.is_infinite());
        assert!(hist.rows().iter().all(|r| r.known_to_aposmm));
    }

    #[test]
    fn test_incomplete_point_not_combined() {
        let mode = ComponentMode {
            components: 2,
            combine: sum_of_squares,
        };
        let mut hist = History::new();
        for c in 0..2 {
            let x = Col::from_fn(2, |_| 0.5);
            let mut row = HistoryRow::new(
                x.clone(),
                x,
                c,
                false,
                EvalData::Component {
                    obj_component: c,
                    pt_id: 0,
                    f_i: 1.0,
                },
            );
            row.returned = c == 0;
            hist.push(row);
        }

        update_history_dist(&mut hist, Some(&mode));
        assert!(hist[0].f.is_infinite());

        // Every unseen row is absorbed, returned or not.
        assert!(hist.rows().iter().all(|r| r.known_to_aposmm));
    }
}
