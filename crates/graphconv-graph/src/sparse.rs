//! Square CSR matrices.
//!
//! Adjacency matrices and Laplacians are stored in compressed sparse row form:
//! `row_ptr[i]..row_ptr[i + 1]` indexes the non-zeros of row `i`, column
//! indices within a row are sorted ascending. Construction from triplets sums
//! duplicates and drops explicit zeros.
//!
//! Products against dense `ndarray` matrices treat every column as one graph
//! signal, which is how the convolution layers batch `samples × feature maps`.

use ndarray::{Array2, ArrayView2};

use crate::error::{GraphError, GraphResult};

/// A square sparse matrix in CSR layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Empty (all-zero) `n × n` matrix.
    pub fn zeros(n: usize) -> Self {
        Self { n, row_ptr: vec![0; n + 1], col_idx: Vec::new(), values: Vec::new() }
    }

    /// `n × n` identity.
    pub fn identity(n: usize) -> Self {
        Self {
            n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Build from `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates are summed; entries that end up exactly zero
    /// are dropped.
    pub fn from_triplets<I>(n: usize, triplets: I) -> GraphResult<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut entries: Vec<(usize, usize, f64)> = Vec::new();
        for (r, c, v) in triplets {
            if r >= n {
                return Err(GraphError::IndexOutOfBounds { index: r, n });
            }
            if c >= n {
                return Err(GraphError::IndexOutOfBounds { index: c, n });
            }
            entries.push((r, c, v));
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            if let Some((pr, pc, pv)) = merged.last_mut() {
                if *pr == r && *pc == c {
                    *pv += v;
                    continue;
                }
            }
            merged.push((r, c, v));
        }
        merged.retain(|&(_, _, v)| v != 0.0);

        let mut row_ptr = vec![0usize; n + 1];
        for &(r, _, _) in &merged {
            row_ptr[r + 1] += 1;
        }
        for i in 0..n {
            row_ptr[i + 1] += row_ptr[i];
        }
        let (col_idx, values) = merged.into_iter().map(|(_, c, v)| (c, v)).unzip();

        Ok(Self { n, row_ptr, col_idx, values })
    }

    /// Build from a dense square matrix, keeping non-zero entries.
    pub fn from_dense(dense: &ArrayView2<f64>) -> GraphResult<Self> {
        let (rows, cols) = dense.dim();
        if rows != cols {
            return Err(GraphError::shape_mismatch(rows, cols));
        }
        let triplets = dense
            .indexed_iter()
            .filter(|(_, &v)| v != 0.0)
            .map(|((r, c), &v)| (r, c, v));
        Self::from_triplets(rows, triplets)
    }

    /// Matrix dimension.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of stored non-zeros.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Non-zeros of row `i` as `(col, value)` pairs, columns ascending.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[span.clone()].iter().copied().zip(self.values[span].iter().copied())
    }

    /// All stored entries as `(row, col, value)`.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n).flat_map(move |r| self.row(r).map(move |(c, v)| (r, c, v)))
    }

    /// Entry `(i, j)`, zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let span = self.row_ptr[i]..self.row_ptr[i + 1];
        match self.col_idx[span.clone()].binary_search(&j) {
            Ok(k) => self.values[span.start + k],
            Err(_) => 0.0,
        }
    }

    /// Diagonal entries.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.get(i, i)).collect()
    }

    /// Per-row sums.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.row(i).map(|(_, v)| v).sum()).collect()
    }

    /// Sum of every stored entry.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Smallest stored value, `None` for an empty matrix.
    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Self {
        let mut row_ptr = vec![0usize; self.n + 1];
        for &c in &self.col_idx {
            row_ptr[c + 1] += 1;
        }
        for i in 0..self.n {
            row_ptr[i + 1] += row_ptr[i];
        }
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0f64; self.nnz()];
        // Rows are visited in ascending order, so each transposed row ends up sorted.
        for (r, c, v) in self.triplets() {
            let at = next[c];
            col_idx[at] = r;
            values[at] = v;
            next[c] += 1;
        }
        Self { n: self.n, row_ptr, col_idx, values }
    }

    /// Largest `|a_ij − a_ji|` over all entries.
    pub fn max_asymmetry(&self) -> f64 {
        self.triplets()
            .map(|(r, c, v)| (v - self.get(c, r)).abs())
            .fold(0.0, f64::max)
    }

    /// Largest absolute stored value.
    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// `(A + Aᵀ) / 2`.
    pub fn symmetrized(&self) -> Self {
        let t = self.transpose();
        let triplets = self
            .triplets()
            .chain(t.triplets())
            .map(|(r, c, v)| (r, c, 0.5 * v))
            .collect::<Vec<_>>();
        // Indices come from a valid n × n matrix.
        Self::from_triplets(self.n, triplets).unwrap_or_else(|_| self.clone())
    }

    /// Apply `f` to every stored value, dropping results equal to zero.
    pub fn map_values<F: Fn(usize, usize, f64) -> f64>(&self, f: F) -> Self {
        let triplets = self.triplets().map(|(r, c, v)| (r, c, f(r, c, v))).collect::<Vec<_>>();
        Self::from_triplets(self.n, triplets).unwrap_or_else(|_| self.clone())
    }

    /// Copy without diagonal entries.
    pub fn without_diagonal(&self) -> Self {
        let triplets = self.triplets().filter(|&(r, c, _)| r != c).collect::<Vec<_>>();
        Self::from_triplets(self.n, triplets).unwrap_or_else(|_| self.clone())
    }

    /// `y = A x`.
    pub fn mul_vec(&self, x: &[f64]) -> GraphResult<Vec<f64>> {
        if x.len() != self.n {
            return Err(GraphError::shape_mismatch(self.n, x.len()));
        }
        Ok((0..self.n).map(|i| self.row(i).map(|(j, v)| v * x[j]).sum()).collect())
    }

    /// `Y = A X` where `X` is `n × m` (one signal per column).
    pub fn mul_dense(&self, x: &ArrayView2<f64>) -> GraphResult<Array2<f64>> {
        let (rows, cols) = x.dim();
        if rows != self.n {
            return Err(GraphError::shape_mismatch(self.n, rows));
        }
        let mut y = Array2::<f64>::zeros((self.n, cols));
        for i in 0..self.n {
            let mut out = y.row_mut(i);
            for (j, v) in self.row(i) {
                out.scaled_add(v, &x.row(j));
            }
        }
        Ok(y)
    }

    /// Dense copy.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::<f64>::zeros((self.n, self.n));
        for (r, c, v) in self.triplets() {
            dense[[r, c]] = v;
        }
        dense
    }

    /// Relabel rows/columns: entry `(i, j)` moves to `(new_index[i], new_index[j])`
    /// in a matrix of size `new_n`.
    pub fn relabel(&self, new_index: &[usize], new_n: usize) -> GraphResult<Self> {
        if new_index.len() != self.n {
            return Err(GraphError::shape_mismatch(self.n, new_index.len()));
        }
        let triplets = self
            .triplets()
            .map(|(r, c, v)| (new_index[r], new_index[c], v))
            .collect::<Vec<_>>();
        Self::from_triplets(new_n, triplets)
    }
}
