//! Dense Cholesky solve for the small symmetric positive-definite systems
//! arising from Gauss–Newton models.

use faer::{Col, ColRef, Mat, MatRef};

use crate::E;

/// Solves `A x = b` for symmetric positive-definite `A` via an unpivoted
/// Cholesky factorization. Returns `None` when a non-positive pivot is
/// encountered, leaving the caller to regularize and retry.
pub(crate) fn solve_spd<'a>(a: MatRef<'a, E>, b: ColRef<'a, E>) -> Option<Col<E>> {
    let n = a.nrows();
    debug_assert_eq!(a.ncols(), n);
    debug_assert_eq!(b.nrows(), n);

    // Lower-triangular factor, column by column.
    let mut l = Mat::<E>::zeros(n, n);
    for j in 0..n {
        let mut pivot = a[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)];
        }
        if pivot <= E::from(0.) || !pivot.is_finite() {
            return None;
        }
        let pivot = pivot.sqrt();
        l[(j, j)] = pivot;

        for i in (j + 1)..n {
            let mut value = a[(i, j)];
            for k in 0..j {
                value -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = value / pivot;
        }
    }

    // Forward substitution: L y = b.
    let mut y = Col::<E>::zeros(n);
    for i in 0..n {
        let mut value = b[i];
        for k in 0..i {
            value -= l[(i, k)] * y[k];
        }
        y[i] = value / l[(i, i)];
    }

    // Back substitution: L^T x = y.
    let mut x = Col::<E>::zeros(n);
    for i in (0..n).rev() {
        let mut value = y[i];
        for k in (i + 1)..n {
            value -= l[(k, i)] * x[k];
        }
        x[i] = value / l[(i, i)];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use faer::Mat;

    use super::*;

    #[test]
    fn test_solve_spd() {
        // A = [[4, 2], [2, 3]], b = [8, 7] -> x = [1.25, 1.5]
        let mut a = Mat::<E>::zeros(2, 2);
        a[(0, 0)] = 4.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 3.0;
        let b = Col::from_fn(2, |i| [8.0, 7.0][i]);

        let x = solve_spd(a.as_ref(), b.as_ref()).unwrap();
        assert_relative_eq!(x[0], 1.25, max_relative = 1e-12);
        assert_relative_eq!(x[1], 1.5, max_relative = 1e-12);
    }

    #[test]
    fn test_solve_spd_rejects_indefinite() {
        let mut a = Mat::<E>::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(1, 1)] = -1.0;
        let b = Col::from_fn(2, |_| 1.0);
        assert!(solve_spd(a.as_ref(), b.as_ref()).is_none());
    }
}
