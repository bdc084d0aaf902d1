use crate::errors::ModelError;
use nalgebra::DMatrix;
use std::ops::Range;

/// Index mapping for the flattened (region, local) axis used by every table
/// in the pipeline: flat index = region * per_region + local. All block
/// slicing goes through these accessors rather than recomputed arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    pub regions: usize,
    pub per_region: usize,
}

impl BlockLayout {
    pub fn new(regions: usize, per_region: usize) -> Self {
        Self {
            regions,
            per_region,
        }
    }

    /// Total length of the flattened axis.
    pub fn total(&self) -> usize {
        self.regions * self.per_region
    }

    /// Flattened index of a (region, local) pair.
    pub fn flat(&self, region: usize, local: usize) -> usize {
        debug_assert!(region < self.regions && local < self.per_region);
        region * self.per_region + local
    }

    /// The flattened index range covered by one region's block.
    pub fn region_range(&self, region: usize) -> Range<usize> {
        let start = region * self.per_region;
        start..start + self.per_region
    }

    /// Checks that a matrix is square with one row per flattened index.
    pub fn check_square(
        &self,
        matrix: &DMatrix<f64>,
        stage: &'static str,
    ) -> Result<(), ModelError> {
        if matrix.nrows() != self.total() || matrix.ncols() != self.total() {
            return Err(ModelError::shape_mismatch(
                stage,
                format!(
                    "expected a {n}x{n} matrix ({} regions of {}), got {}x{}",
                    self.regions,
                    self.per_region,
                    matrix.nrows(),
                    matrix.ncols(),
                    n = self.total(),
                ),
            ));
        }
        Ok(())
    }

    /// Checks that a name table has one row per flattened matrix row. Stages
    /// that take both a matrix and a name table must call this before
    /// relying on row order.
    pub fn check_alignment(&self, rows: usize, stage: &'static str) -> Result<(), ModelError> {
        if rows != self.total() {
            return Err(ModelError::shape_mismatch(
                stage,
                format!(
                    "name table has {} rows but the layout covers {} ({} regions of {})",
                    rows,
                    self.total(),
                    self.regions,
                    self.per_region,
                ),
            ));
        }
        Ok(())
    }
}
