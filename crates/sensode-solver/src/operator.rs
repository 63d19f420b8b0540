//! Matrix-free operator trait and a CSR implementation for sparse Jacobians.

/// A linear operator that computes y = A * x for real (f64) vectors.
pub trait RealOperator: Send + Sync {
    /// Dimension of the operator (N x N).
    fn dim(&self) -> usize;

    /// Apply the operator: y = A * x.
    ///
    /// `x` and `y` are f64 vectors of length `dim()`.
    fn apply(&self, x: &[f64], y: &mut [f64]);
}

/// Square sparse matrix in compressed sparse row form.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseOperator {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseOperator {
    /// Build from `(row, col, value)` triplets; duplicates are summed.
    ///
    /// Returns `None` if a triplet lies outside the `n x n` pattern.
    pub fn from_triplets(n: usize, triplets: &[(usize, usize, f64)]) -> Option<Self> {
        if triplets.iter().any(|&(r, c, _)| r >= n || c >= n) {
            return None;
        }
        let mut sorted: Vec<(usize, usize, f64)> = triplets.to_vec();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; n + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            col_idx.push(c);
            values.push(v);
            row_ptr[r + 1] += 1;
            last = Some((r, c));
        }
        for i in 0..n {
            row_ptr[i + 1] += row_ptr[i];
        }
        Some(Self {
            n,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
}

impl RealOperator for SparseOperator {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        for (row, yi) in y.iter_mut().enumerate().take(self.n) {
            let range = self.row_ptr[row]..self.row_ptr[row + 1];
            *yi = self.col_idx[range.clone()]
                .iter()
                .zip(&self.values[range])
                .map(|(&c, &v)| v * x[c])
                .sum();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_operator_matvec() {
        // [[2, 0, 1], [0, 3, 0], [4, 0, 5]]
        let triplets = vec![(0, 0, 2.0), (2, 2, 5.0), (0, 2, 1.0), (1, 1, 3.0), (2, 0, 4.0)];
        let op = SparseOperator::from_triplets(3, &triplets).unwrap();
        assert_eq!(op.dim(), 3);
        assert_eq!(op.nnz(), 5);

        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![0.0; 3];
        op.apply(&x, &mut y);

        assert!((y[0] - 5.0).abs() < 1e-15);
        assert!((y[1] - 6.0).abs() < 1e-15);
        assert!((y[2] - 19.0).abs() < 1e-15);
    }

    #[test]
    fn sparse_operator_sums_duplicates() {
        let op = SparseOperator::from_triplets(1, &[(0, 0, 1.0), (0, 0, 2.5)]).unwrap();
        assert_eq!(op.nnz(), 1);
        let mut y = vec![0.0];
        op.apply(&[2.0], &mut y);
        assert!((y[0] - 7.0).abs() < 1e-15);
    }

    #[test]
    fn sparse_operator_rejects_out_of_range() {
        assert!(SparseOperator::from_triplets(2, &[(2, 0, 1.0)]).is_none());
    }

    #[test]
    fn operator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SparseOperator>();
    }
}
