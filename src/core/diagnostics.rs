use crate::core::layout::BlockLayout;
use crate::errors::ModelError;
use nalgebra::DMatrix;

/// Supply-side diagnostic for one flattened (region, product) row.
#[derive(Clone, Debug, PartialEq)]
pub struct SupplyDiagFlags {
    /// Supply of the product by its principal producer (the diagonal entry).
    pub principal_supply: f64,
    /// Supply of the product by the other industries of its own region.
    pub byproduct_supply: f64,
    /// True when the product has no principal producer in its region but is
    /// supplied as a byproduct there.
    pub exclusive_byproduct: bool,
}

/// Checks the supply table diagonal per product row: how much of each
/// product comes from its principal producer versus as a byproduct of the
/// region's other industries, and whether the byproduct is exclusive.
///
/// Supply and use must be square and equal in shape, one row per flattened
/// (region, product) index.
pub fn supply_diag_check(
    v: &DMatrix<f64>,
    u: &DMatrix<f64>,
    layout: BlockLayout,
) -> Result<Vec<SupplyDiagFlags>, ModelError> {
    layout.check_square(v, "supply_diag_check")?;
    layout.check_square(u, "supply_diag_check")?;

    let flags = (0..layout.total())
        .map(|i| {
            let region = i / layout.per_region;
            let principal_supply = v[(i, i)];
            let byproduct_supply: f64 = layout
                .region_range(region)
                .filter(|&j| j != i)
                .map(|j| v[(i, j)])
                .sum();
            SupplyDiagFlags {
                principal_supply,
                byproduct_supply,
                exclusive_byproduct: principal_supply == 0.0 && byproduct_supply > 0.0,
            }
        })
        .collect();
    Ok(flags)
}
