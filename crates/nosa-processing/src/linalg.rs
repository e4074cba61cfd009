//! Small dense and banded solvers used by the fitting routines
//!
//! All solvers return `None` when the system is singular or produces
//! non-finite values; callers turn that into an unavailable result.

/// Relative pivot tolerance for rank decisions
const RANK_TOLERANCE: f64 = 1e-12;

/// Least-squares solution of `a·x ≈ b` via Householder QR
///
/// `a` is given row by row (`m` rows of `n` columns, `m ≥ n`).
pub fn least_squares(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let m = a.len();
    if m == 0 || b.len() != m {
        return None;
    }
    let n = a[0].len();
    if n == 0 || m < n || a.iter().any(|row| row.len() != n) {
        return None;
    }

    let mut r = a.to_vec();
    let mut y = b.to_vec();

    for k in 0..n {
        let norm = (k..m).map(|i| r[i][k] * r[i][k]).sum::<f64>().sqrt();
        if norm == 0.0 {
            return None;
        }
        let alpha = if r[k][k] > 0.0 { -norm } else { norm };

        // Householder vector for column k
        let mut v: Vec<f64> = (k..m).map(|i| r[i][k]).collect();
        v[0] -= alpha;
        let v_norm2: f64 = v.iter().map(|x| x * x).sum();
        if v_norm2 == 0.0 {
            continue;
        }

        for j in k..n {
            let dot: f64 = (k..m).map(|i| v[i - k] * r[i][j]).sum();
            let factor = 2.0 * dot / v_norm2;
            for i in k..m {
                r[i][j] -= factor * v[i - k];
            }
        }
        let dot: f64 = (k..m).map(|i| v[i - k] * y[i]).sum();
        let factor = 2.0 * dot / v_norm2;
        for i in k..m {
            y[i] -= factor * v[i - k];
        }
    }

    let scale = (0..n).map(|k| r[k][k].abs()).fold(0.0, f64::max);
    let mut x = vec![0.0; n];
    for k in (0..n).rev() {
        let diag = r[k][k];
        if diag.abs() <= RANK_TOLERANCE * scale {
            return None;
        }
        let s: f64 = ((k + 1)..n).map(|j| r[k][j] * x[j]).sum();
        x[k] = (y[k] - s) / diag;
    }

    finite(x)
}

/// Gaussian elimination with partial pivoting for small square systems
pub fn solve_dense(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut rhs = b.to_vec();
    let scale = m
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return None;
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() <= RANK_TOLERANCE * scale {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let s: f64 = ((row + 1)..n).map(|k| m[row][k] * x[k]).sum();
        x[row] = (rhs[row] - s) / m[row][row];
    }

    finite(x)
}

/// Symmetric positive definite pentadiagonal system via banded LDLᵀ
///
/// `main` holds the diagonal, `first` and `second` the first and second
/// off-diagonals (lengths `n`, `n-1`, `n-2`).
pub fn solve_pentadiagonal(main: &[f64], first: &[f64], second: &[f64], b: &[f64]) -> Option<Vec<f64>> {
    let n = main.len();
    if b.len() != n || first.len() + 1 < n || second.len() + 2 < n {
        return None;
    }

    let mut d = vec![0.0; n];
    let mut l1 = vec![0.0; n]; // L[i+1][i]
    let mut l2 = vec![0.0; n]; // L[i+2][i]

    for i in 0..n {
        let mut di = main[i];
        if i >= 1 {
            di -= l1[i - 1] * l1[i - 1] * d[i - 1];
        }
        if i >= 2 {
            di -= l2[i - 2] * l2[i - 2] * d[i - 2];
        }
        if !di.is_finite() || di <= f64::EPSILON * main[i].abs().max(1.0) {
            return None;
        }
        d[i] = di;

        if i + 1 < n {
            let mut v = first[i];
            if i >= 1 {
                v -= l2[i - 1] * l1[i - 1] * d[i - 1];
            }
            l1[i] = v / di;
        }
        if i + 2 < n {
            l2[i] = second[i] / di;
        }
    }

    // Forward substitution with unit lower L
    let mut y = b.to_vec();
    for i in 0..n {
        if i >= 1 {
            y[i] -= l1[i - 1] * y[i - 1];
        }
        if i >= 2 {
            y[i] -= l2[i - 2] * y[i - 2];
        }
    }
    for i in 0..n {
        y[i] /= d[i];
    }
    // Back substitution with Lᵀ
    for i in (0..n).rev() {
        if i + 1 < n {
            y[i] -= l1[i] * y[i + 1];
        }
        if i + 2 < n {
            y[i] -= l2[i] * y[i + 2];
        }
    }

    finite(y)
}

/// Tridiagonal system by the Thomas algorithm
///
/// `lower[i]` multiplies `x[i-1]` in row `i` (entry 0 unused), `upper[i]`
/// multiplies `x[i+1]` (last entry unused).
pub fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = diag.len();
    if lower.len() != n || upper.len() != n || rhs.len() != n || n == 0 {
        return None;
    }
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    if diag[0] == 0.0 {
        return None;
    }
    c[0] = upper[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i] * c[i - 1];
        if denom == 0.0 {
            return None;
        }
        c[i] = upper[i] / denom;
        d[i] = (rhs[i] - lower[i] * d[i - 1]) / denom;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d[i] - c[i] * x[i + 1];
    }

    finite(x)
}

fn finite(x: Vec<f64>) -> Option<Vec<f64>> {
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tol, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_least_squares_line() {
        // y = 2x + 1 with exact data
        let a: Vec<Vec<f64>> = (0..5).map(|x| vec![1.0, x as f64]).collect();
        let b: Vec<f64> = (0..5).map(|x| 2.0 * x as f64 + 1.0).collect();
        let x = least_squares(&a, &b).unwrap();
        assert_close(&x, &[1.0, 2.0], 1e-10);
    }

    #[test]
    fn test_least_squares_rank_deficient() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]];
        assert!(least_squares(&a, &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_solve_dense() {
        let a = vec![
            vec![0.0, 2.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![3.0, 0.0, 1.0],
        ];
        let x = solve_dense(&a, &[5.0, 3.0, 4.0]).unwrap();
        assert_close(&x, &[1.0, 2.0, 1.0], 1e-12);

        let singular = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(solve_dense(&singular, &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_pentadiagonal_matches_dense() {
        let n = 6;
        let main = vec![6.0; n];
        let first = vec![-2.0; n - 1];
        let second = vec![0.5; n - 2];
        let b: Vec<f64> = (0..n).map(|i| i as f64 + 1.0).collect();

        let mut dense = vec![vec![0.0; n]; n];
        for i in 0..n {
            dense[i][i] = main[i];
            if i + 1 < n {
                dense[i][i + 1] = first[i];
                dense[i + 1][i] = first[i];
            }
            if i + 2 < n {
                dense[i][i + 2] = second[i];
                dense[i + 2][i] = second[i];
            }
        }

        let banded = solve_pentadiagonal(&main, &first, &second, &b).unwrap();
        let reference = solve_dense(&dense, &b).unwrap();
        assert_close(&banded, &reference, 1e-10);
    }

    #[test]
    fn test_pentadiagonal_singular() {
        assert!(solve_pentadiagonal(&[0.0, 0.0], &[0.0], &[], &[1.0, 1.0]).is_none());
    }

    #[test]
    fn test_tridiagonal() {
        // [2 1 0; 1 2 1; 0 1 2] x = [4 8 8] -> x = [1 2 3]
        let x = solve_tridiagonal(&[0.0, 1.0, 1.0], &[2.0, 2.0, 2.0], &[1.0, 1.0, 0.0], &[4.0, 8.0, 8.0]).unwrap();
        assert_close(&x, &[1.0, 2.0, 3.0], 1e-12);
    }
}
