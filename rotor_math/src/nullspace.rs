//! Allocation Matrix -> Null Space Basis + Pseudo Inverse

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{AllocationError, AllocationMatrix, AllocationResult};

/// Singular values at or below this fraction of the largest one count as zero
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-10;

/// Largest acceptable `max |A·N|` before the solver complains
const RESIDUAL_WARN_LEVEL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullSpaceSolver {
    rank_tolerance: f64,
}

impl Default for NullSpaceSolver {
    fn default() -> Self {
        Self {
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl NullSpaceSolver {
    pub fn new(rank_tolerance: f64) -> AllocationResult<Self> {
        if !(rank_tolerance.is_finite() && rank_tolerance > 0.0) {
            return Err(AllocationError::InvalidTolerance(rank_tolerance));
        }

        Ok(Self { rank_tolerance })
    }

    pub fn rank_tolerance(&self) -> f64 {
        self.rank_tolerance
    }

    /// Factors `matrix` with a dense SVD.
    ///
    /// The matrix is zero padded to at least as many rows as rotors so the decomposition
    /// yields every right singular vector; padding rows do not change the null space.
    ///
    /// Basis columns are ordered by descending singular value (ties keep SVD order) and each
    /// column is signed so that its largest magnitude component (the first one on ties) is
    /// positive.
    #[instrument(level = "trace", skip_all, fields(rotors = matrix.rotor_count()))]
    pub fn solve(&self, matrix: &AllocationMatrix) -> AllocationResult<NullSpaceBasis> {
        let a = matrix.matrix();
        let (rows, rotors) = a.shape();

        if rotors == 0 {
            return Err(AllocationError::DegenerateGeometry {
                max_singular_value: 0.0,
            });
        }

        let mut padded = DMatrix::zeros(rows.max(rotors), rotors);
        padded.view_mut((0, 0), (rows, rotors)).copy_from(a);

        let svd = padded.svd(true, true);
        let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
            return Err(AllocationError::NonFinite("singular value decomposition"));
        };
        let singular_values = svd.singular_values;

        let mut order = (0..singular_values.len()).collect::<Vec<_>>();
        order.sort_by(|&lhs, &rhs| singular_values[rhs].total_cmp(&singular_values[lhs]));

        let max_singular_value = singular_values[order[0]];
        if !max_singular_value.is_finite() {
            return Err(AllocationError::NonFinite("singular values"));
        }

        let threshold = self.rank_tolerance * max_singular_value;
        let rank = order
            .iter()
            .take_while(|&&idx| singular_values[idx] > threshold)
            .count();

        if rank < 1 {
            return Err(AllocationError::DegenerateGeometry { max_singular_value });
        }

        let null_indices = &order[rank..];
        let signs = null_indices
            .iter()
            .map(|&idx| dominant_sign(v_t.row(idx).iter().copied()))
            .collect::<Vec<_>>();
        let basis = DMatrix::from_fn(rotors, null_indices.len(), |row, col| {
            v_t[(null_indices[col], row)] * signs[col]
        });

        let mut pseudo_inverse = DMatrix::zeros(rotors, rows);
        for &idx in &order[..rank] {
            let v = v_t.row(idx).transpose();
            let u_t = u.column(idx).rows(0, rows).transpose();

            pseudo_inverse += (v * u_t) / singular_values[idx];
        }

        let residual = if basis.ncols() == 0 {
            0.0
        } else {
            (a * &basis).amax()
        };

        if residual > RESIDUAL_WARN_LEVEL * max_singular_value.max(1.0) {
            warn!("Null space residual {residual:e} exceeds tolerance");
        }

        debug!(
            rank,
            null_dim = basis.ncols(),
            residual,
            "Factored allocation matrix"
        );

        Ok(NullSpaceBasis {
            basis,
            pseudo_inverse,
            singular_values: DVector::from_iterator(
                order.len(),
                order.iter().map(|&idx| singular_values[idx]),
            ),
            rank,
            threshold,
            residual,
        })
    }
}

fn dominant_sign(values: impl Iterator<Item = f64>) -> f64 {
    let dominant = values.fold(0.0f64, |best, value| {
        if value.abs() > best.abs() {
            value
        } else {
            best
        }
    });

    if dominant < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Orthonormal basis of the allocation matrix null space, together with the other
/// products of the same factorization
#[derive(Debug, Clone, PartialEq)]
pub struct NullSpaceBasis {
    /// R x K, orthonormal columns
    basis: DMatrix<f64>,
    /// R x rows
    pseudo_inverse: DMatrix<f64>,
    /// One per right singular vector, descending
    singular_values: DVector<f64>,
    rank: usize,
    threshold: f64,
    residual: f64,
}

impl NullSpaceBasis {
    pub fn basis(&self) -> &DMatrix<f64> {
        &self.basis
    }

    /// Moore-Penrose pseudo inverse of the factored matrix
    pub fn pseudo_inverse(&self) -> &DMatrix<f64> {
        &self.pseudo_inverse
    }

    pub fn singular_values(&self) -> &DVector<f64> {
        &self.singular_values
    }

    /// K, the measured null space dimension. Not necessarily the design value.
    pub fn dim(&self) -> usize {
        self.basis.ncols()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn rotor_count(&self) -> usize {
        self.basis.nrows()
    }

    /// Absolute singular value cutoff used for rank detection
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `max |A·N|` measured right after factoring
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Orthogonal projector onto the null space, N·Nᵀ
    pub fn projector(&self) -> DMatrix<f64> {
        &self.basis * self.basis.transpose()
    }

    /// Compares spanned subspaces, which unlike the bases themselves are free of
    /// sign and ordering choices
    pub fn same_subspace(&self, other: &NullSpaceBasis, tolerance: f64) -> bool {
        self.basis.shape() == other.basis.shape()
            && (self.projector() - other.projector()).amax() <= tolerance
    }
}
