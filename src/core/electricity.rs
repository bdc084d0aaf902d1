use crate::core::byproducts::ELECTRICITY_PRODUCT_PREFIX;
use crate::core::layout::BlockLayout;
use crate::input::ProductNames;
use nalgebra::{DMatrix, DVector};
use tracing::{info, warn};

const BALANCE_TOLERANCE: f64 = 1e-6;

/// The regional electricity grids split out of the main tables, plus the
/// main tables with the redirected flows removed.
#[derive(Clone, Debug)]
pub struct ElectricityGrid {
    /// Supply table with electricity byproduct supply zeroed (principal
    /// diagonal entries untouched).
    pub v_main: DMatrix<f64>,
    /// Use table with the electricity rows zeroed.
    pub u_main: DMatrix<f64>,
    /// Total electricity provided by each region's grid; becomes the grid
    /// block diagonal of the assembled supply table.
    pub grid_supply_totals: DVector<f64>,
    /// Electricity mix of each grid: which electricity products the grid
    /// activity draws, one column per region.
    pub grid_mix: DMatrix<f64>,
    /// Byproduct electricity each activity feeds into its region's grid,
    /// one row per region.
    pub grid_supply_by_activity: DMatrix<f64>,
    /// Grid electricity each activity draws, one row per region.
    pub grid_use_by_activity: DMatrix<f64>,
}

/// Splits electricity flows out of the aggregated tables into one national
/// grid per region. Every industry's electricity use moves to a draw on its
/// region's grid, and every industry's byproduct electricity supply becomes
/// a feed into that grid; the grid balances by construction (its supply is
/// the total regional demand).
pub fn build_electricity_grid(
    v_agg: &DMatrix<f64>,
    u_agg: &DMatrix<f64>,
    layout: BlockLayout,
    product_names: &ProductNames,
) -> anyhow::Result<ElectricityGrid> {
    info!("Creating electricity grids for {} regions", layout.regions);
    layout.check_square(v_agg, "build_electricity_grid")?;
    layout.check_square(u_agg, "build_electricity_grid")?;
    layout.check_alignment(product_names.table.len(), "build_electricity_grid")?;

    let electricity_rows: Vec<usize> = product_names
        .table
        .iter()
        .enumerate()
        .filter(|(_, row)| row.code_primary.contains(ELECTRICITY_PRODUCT_PREFIX))
        .map(|(i, _)| i)
        .collect();

    let total = layout.total();
    let n_reg = layout.regions;
    let mut v_main = v_agg.clone();
    let mut u_main = u_agg.clone();
    // blank the diagonal so byproduct supply can be summed without the
    // principal production
    for i in 0..total {
        v_main[(i, i)] = 0.0;
    }

    let mut grid_supply_totals: DVector<f64> = DVector::zeros(n_reg);
    let mut grid_mix: DMatrix<f64> = DMatrix::zeros(total, n_reg);
    let mut grid_supply_by_activity: DMatrix<f64> = DMatrix::zeros(n_reg, total);
    let mut grid_use_by_activity: DMatrix<f64> = DMatrix::zeros(n_reg, total);

    for r in 0..n_reg {
        let region_columns = layout.region_range(r);
        for &p in &electricity_rows {
            grid_mix[(p, r)] = region_columns.clone().map(|j| u_agg[(p, j)]).sum();
        }
        grid_supply_totals[r] = electricity_rows.iter().map(|&p| grid_mix[(p, r)]).sum();
        for j in region_columns.clone() {
            grid_use_by_activity[(r, j)] = electricity_rows.iter().map(|&p| u_agg[(p, j)]).sum();
            grid_supply_by_activity[(r, j)] =
                electricity_rows.iter().map(|&p| v_main[(p, j)]).sum();
        }
        for &p in &electricity_rows {
            for j in region_columns.clone() {
                v_main[(p, j)] = 0.0;
            }
        }
    }

    // principal production stays in the main table; only the byproduct
    // entries moved to the grids
    for i in 0..total {
        v_main[(i, i)] = v_agg[(i, i)];
    }
    // all electricity is now bought from the regional grid rather than
    // directly from producers
    for &p in &electricity_rows {
        for j in 0..total {
            u_main[(p, j)] = 0.0;
        }
    }

    let removed: f64 = electricity_rows.iter().map(|&p| u_agg.row(p).sum()).sum();
    let redirected = grid_use_by_activity.sum();
    if (redirected - removed).abs() > BALANCE_TOLERANCE * removed.abs().max(1.0) {
        warn!(
            "Electricity redirected to the grids ({redirected}) does not match \
             the use removed from the main table ({removed})"
        );
    }

    Ok(ElectricityGrid {
        v_main,
        u_main,
        grid_supply_totals,
        grid_mix,
        grid_supply_by_activity,
        grid_use_by_activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::product_names_from_reader;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    /// Two regions of two products; the second product of each region is
    /// electricity.
    #[fixture]
    fn names() -> ProductNames {
        let csv = "\
Country code,Product name,Product code 1,Product code 2,Unit\n\
NL,Wheat,p01,C_WHEA,tonnes\n\
NL,Electricity by coal,p40.11.a,C_POWC,TJ\n\
DE,Wheat,p01,C_WHEA,tonnes\n\
DE,Electricity by coal,p40.11.a,C_POWC,TJ\n";
        product_names_from_reader(csv.as_bytes()).unwrap()
    }

    #[fixture]
    fn layout() -> BlockLayout {
        BlockLayout::new(2, 2)
    }

    #[fixture]
    fn supply() -> DMatrix<f64> {
        let mut v = DMatrix::zeros(4, 4);
        v[(0, 0)] = 10.0;
        v[(1, 1)] = 6.0;
        // wheat farming co-generates electricity in both regions
        v[(1, 0)] = 2.0;
        v[(2, 2)] = 8.0;
        v[(3, 3)] = 5.0;
        v[(3, 2)] = 1.5;
        v
    }

    #[fixture]
    fn use_table() -> DMatrix<f64> {
        let mut u = DMatrix::zeros(4, 4);
        // region NL industries draw NL electricity
        u[(1, 0)] = 3.0;
        u[(1, 1)] = 1.0;
        // region DE industries draw DE electricity and import NL electricity
        u[(3, 2)] = 2.0;
        u[(1, 2)] = 0.5;
        // some non-electricity use that must be left alone
        u[(0, 0)] = 4.0;
        u
    }

    #[rstest]
    fn should_balance_each_grid_with_regional_demand(
        supply: DMatrix<f64>,
        use_table: DMatrix<f64>,
        layout: BlockLayout,
        names: ProductNames,
    ) {
        let grid = build_electricity_grid(&supply, &use_table, layout, &names).unwrap();
        // NL grid: 3.0 + 1.0 drawn by NL industries
        assert_relative_eq!(grid.grid_supply_totals[0], 4.0);
        // DE grid: 2.0 of DE electricity plus 0.5 imported NL electricity
        assert_relative_eq!(grid.grid_supply_totals[1], 2.5);
        // the grid mix keeps the imported electricity on its own product row
        assert_relative_eq!(grid.grid_mix[(1, 1)], 0.5);
        assert_relative_eq!(grid.grid_mix[(3, 1)], 2.0);
    }

    #[rstest]
    fn should_conserve_total_electricity_use(
        supply: DMatrix<f64>,
        use_table: DMatrix<f64>,
        layout: BlockLayout,
        names: ProductNames,
    ) {
        let grid = build_electricity_grid(&supply, &use_table, layout, &names).unwrap();
        let ut = &use_table;
        let removed: f64 = [1usize, 3]
            .iter()
            .flat_map(|&p| (0..4).map(move |j| ut[(p, j)]))
            .sum();
        assert_relative_eq!(grid.grid_supply_totals.sum(), removed);
        assert_relative_eq!(grid.grid_use_by_activity.sum(), removed);
        // electricity rows are gone from the main use table
        assert_eq!(grid.u_main.row(1).sum(), 0.0);
        assert_eq!(grid.u_main.row(3).sum(), 0.0);
        // non-electricity use is untouched
        assert_eq!(grid.u_main[(0, 0)], 4.0);
    }

    #[rstest]
    fn should_move_byproduct_supply_to_the_grid_and_keep_the_diagonal(
        supply: DMatrix<f64>,
        use_table: DMatrix<f64>,
        layout: BlockLayout,
        names: ProductNames,
    ) {
        let grid = build_electricity_grid(&supply, &use_table, layout, &names).unwrap();
        // byproduct entries are zeroed in the main supply table
        assert_eq!(grid.v_main[(1, 0)], 0.0);
        assert_eq!(grid.v_main[(3, 2)], 0.0);
        // principal production survives
        assert_eq!(grid.v_main[(1, 1)], 6.0);
        assert_eq!(grid.v_main[(3, 3)], 5.0);
        assert_eq!(grid.v_main[(0, 0)], 10.0);
        // the grid receives exactly the byproduct amounts
        assert_relative_eq!(grid.grid_supply_by_activity[(0, 0)], 2.0);
        assert_relative_eq!(grid.grid_supply_by_activity[(1, 2)], 1.5);
        assert_relative_eq!(grid.grid_supply_by_activity.sum(), 3.5);
    }

    #[rstest]
    fn should_produce_zero_grids_without_electricity_products(layout: BlockLayout) {
        let csv = "\
Country code,Product name,Product code 1,Product code 2,Unit\n\
NL,Wheat,p01,C_WHEA,tonnes\n\
NL,Maize,p02,C_MAIZ,tonnes\n\
DE,Wheat,p01,C_WHEA,tonnes\n\
DE,Maize,p02,C_MAIZ,tonnes\n";
        let names = product_names_from_reader(csv.as_bytes()).unwrap();
        let v = DMatrix::from_element(4, 4, 1.0);
        let u = DMatrix::from_element(4, 4, 1.0);
        let grid = build_electricity_grid(&v, &u, layout, &names).unwrap();
        assert_eq!(grid.grid_supply_totals.sum(), 0.0);
        assert_eq!(grid.grid_mix.sum(), 0.0);
        // nothing redirected, nothing removed
        assert_eq!(grid.u_main, u);
        assert_eq!(grid.v_main, v);
    }
}
