use crate::traits::LinearSolver;
use faer::{prelude::*, solvers::PartialPivLu, Mat};
use num_traits::Zero;
use sprs::{CsMat, TriMat};
use std::ops::{Add, Mul};

/// Computes `a * x` for a CSR matrix.
pub fn mul_vec<N>(a: &CsMat<N>, x: &[N]) -> Vec<N>
where
    N: Copy + Zero + Add<Output = N> + Mul<Output = N>,
{
    assert_eq!(x.len(), a.cols());
    a.outer_iterator()
        .map(|row| {
            row.iter()
                .fold(N::zero(), |acc, (j, &v)| acc + v * x[j])
        })
        .collect()
}

/// Returns the sub-matrix at the intersection of `rows` and `cols`.
pub fn select<N>(a: &CsMat<N>, rows: &[usize], cols: &[usize]) -> CsMat<N>
where
    N: Copy + Zero + Add<Output = N>,
{
    let mut col_pos = vec![None; a.cols()];
    for (k, &c) in cols.iter().enumerate() {
        col_pos[c] = Some(k);
    }
    let mut tri = TriMat::new((rows.len(), cols.len()));
    for (r, &i) in rows.iter().enumerate() {
        if let Some(row) = a.outer_view(i) {
            for (j, &v) in row.iter() {
                if let Some(c) = col_pos[j] {
                    tri.add_triplet(r, c, v);
                }
            }
        }
    }
    tri.to_csr()
}

/// LU factorisation with partial pivoting from faer.
#[derive(Debug, Clone, Default)]
pub struct FaerLU;

impl LinearSolver for FaerLU {
    fn solve(&self, a_mat: CsMat<f64>, b: &[f64]) -> Result<Vec<f64>, String> {
        let n = a_mat.rows();
        if a_mat.cols() != n {
            return Err(format!("matrix must be square ({}x{})", n, a_mat.cols()));
        }
        if b.len() != n {
            return Err(format!("rhs length {} must equal {}", b.len(), n));
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut values = vec![0.0; n * n];
        for (i, row) in a_mat.outer_iterator().enumerate() {
            for (j, &v) in row.iter() {
                values[i * n + j] += v;
            }
        }
        let mat = Mat::from_fn(n, n, |i, j| values[i * n + j]);
        let rhs = Mat::from_fn(n, 1, |i, _| b[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs);

        let x: Vec<f64> = (0..n).map(|i| sol.read(i, 0)).collect();
        if x.iter().any(|v| !v.is_finite()) {
            return Err("matrix is singular".to_string());
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr(rows: usize, cols: usize, values: &[f64]) -> CsMat<f64> {
        let mut tri = TriMat::new((rows, cols));
        for r in 0..rows {
            for c in 0..cols {
                let v = values[r * cols + c];
                if v != 0.0 {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        tri.to_csr()
    }

    #[test]
    fn solves_with_pivoting() -> anyhow::Result<()> {
        // zero on the leading diagonal forces a row swap
        let a = csr(3, 3, &[0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let x_exp = [1.0, -2.0, 3.0];
        let b = mul_vec(&a, &x_exp);
        let x = FaerLU.solve(a, &b).map_err(anyhow::Error::msg)?;
        for (xi, ei) in x.iter().zip(x_exp) {
            assert!((xi - ei).abs() < 1e-12, "{} != {}", xi, ei);
        }
        Ok(())
    }

    #[test]
    fn singular_matrix_is_an_error() {
        let a = csr(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(FaerLU.solve(a, &[1.0, 3.0]).is_err());
    }

    #[test]
    fn duplicate_triplets_accumulate() {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 1.0);
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(2, 1, 5.0);
        let m: CsMat<f64> = tri.to_csr();
        let s = select(&m, &[0, 2], &[0, 1]);
        assert_eq!(s.rows(), 2);
        assert_eq!(s.get(0, 0), Some(&3.0));
        assert_eq!(s.get(1, 1), Some(&5.0));
        assert_eq!(s.get(1, 0), None);
    }
}
