//! Small dense linear algebra for the Newton solvers
//!
//! Matrices are flat row-major `Vec<f64>` of size `n * n`.

use crate::error::EngineError;

/// Pivot floor below which a matrix is treated as not positive definite
const PIVOT_FLOOR: f64 = 1e-12;

/// Solve `A x = b` for symmetric positive definite `A` by Cholesky factorization
pub fn cholesky_solve(a: &[f64], b: &[f64], n: usize) -> Result<Vec<f64>, EngineError> {
    if a.len() != n * n || b.len() != n {
        return Err(EngineError::ModelFit(format!(
            "dimension mismatch: matrix {} entries, vector {}, n = {n}",
            a.len(),
            b.len()
        )));
    }

    // A = L * L^T
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }

            if i == j {
                if !sum.is_finite() || sum <= PIVOT_FLOOR {
                    return Err(EngineError::ModelFit(format!(
                        "matrix is not positive definite (pivot {i} = {sum:e})"
                    )));
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    // L * y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    // L^T * x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }

    Ok(x)
}

/// Dot product of two equal-length slices
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Largest absolute entry, 0 for an empty slice
pub fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_2x2() {
        // [4 2; 2 3] x = [2; 1] -> x = [0.5, 0]
        let a = vec![4.0, 2.0, 2.0, 3.0];
        let x = cholesky_solve(&a, &[2.0, 1.0], 2).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }

    #[test]
    fn test_solve_identity() {
        let a = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let x = cholesky_solve(&a, &[3.0, -1.0, 2.0], 3).unwrap();
        assert_eq!(x, vec![3.0, -1.0, 2.0]);
    }

    #[test]
    fn test_rejects_singular() {
        let a = vec![1.0, 1.0, 1.0, 1.0];
        assert!(matches!(
            cholesky_solve(&a, &[1.0, 1.0], 2),
            Err(EngineError::ModelFit(_))
        ));
    }

    #[test]
    fn test_dot_and_max_abs() {
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert_eq!(max_abs(&[-3.0, 2.0]), 3.0);
        assert_eq!(max_abs(&[]), 0.0);
    }
}
