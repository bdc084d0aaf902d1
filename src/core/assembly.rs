use crate::core::electricity::ElectricityGrid;
use crate::core::markets::ByproductMarkets;
use crate::errors::ModelError;
use nalgebra::DMatrix;
use tracing::info;

/// Assembles the final square supply and use tables from the main block,
/// the electricity grid block and the byproduct market block.
///
/// Row/column order is: original activities, electricity markets, byproduct
/// markets. Grid and market totals sit on the diagonal of their blocks;
/// their activity rows and mix columns border the main block; every other
/// corner stays zero.
pub fn assemble_sut(
    markets: &ByproductMarkets,
    grid: &ElectricityGrid,
) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
    info!("Assembling the final SUT");
    let main = markets.v_main.nrows();
    let n_elec = grid.grid_supply_totals.len();
    let n_markets = markets.market_supply_totals.len();
    let full = main + n_elec + n_markets;

    check_block(&markets.v_main, (main, main), "main supply block")?;
    check_block(&markets.u_main, (main, main), "main use block")?;
    check_block(&grid.grid_mix, (main, n_elec), "grid mix block")?;
    check_block(
        &grid.grid_use_by_activity,
        (n_elec, main),
        "grid use-by-activity block",
    )?;
    check_block(
        &grid.grid_supply_by_activity,
        (n_elec, main),
        "grid supply-by-activity block",
    )?;
    check_block(&markets.market_input_mix, (main, n_markets), "market mix block")?;
    check_block(
        &markets.market_use_by_activity,
        (n_markets, main),
        "market use-by-activity block",
    )?;
    check_block(
        &markets.market_supply_by_activity,
        (n_markets, main),
        "market supply-by-activity block",
    )?;

    let mut v_full = DMatrix::zeros(full, full);
    let mut u_full = DMatrix::zeros(full, full);

    v_full
        .view_mut((0, 0), (main, main))
        .copy_from(&markets.v_main);
    u_full
        .view_mut((0, 0), (main, main))
        .copy_from(&markets.u_main);

    // electricity markets
    u_full
        .view_mut((main, 0), (n_elec, main))
        .copy_from(&grid.grid_use_by_activity);
    u_full
        .view_mut((0, main), (main, n_elec))
        .copy_from(&grid.grid_mix);
    v_full
        .view_mut((main, 0), (n_elec, main))
        .copy_from(&grid.grid_supply_by_activity);
    for r in 0..n_elec {
        v_full[(main + r, main + r)] = grid.grid_supply_totals[r];
    }

    // byproduct markets
    let markets_offset = main + n_elec;
    u_full
        .view_mut((markets_offset, 0), (n_markets, main))
        .copy_from(&markets.market_use_by_activity);
    u_full
        .view_mut((0, markets_offset), (main, n_markets))
        .copy_from(&markets.market_input_mix);
    v_full
        .view_mut((markets_offset, 0), (n_markets, main))
        .copy_from(&markets.market_supply_by_activity);
    for m in 0..n_markets {
        v_full[(markets_offset + m, markets_offset + m)] = markets.market_supply_totals[m];
    }

    Ok((v_full, u_full))
}

fn check_block(
    matrix: &DMatrix<f64>,
    expected: (usize, usize),
    what: &str,
) -> Result<(), ModelError> {
    if matrix.shape() != expected {
        return Err(ModelError::shape_mismatch(
            "assemble_sut",
            format!(
                "{what} is {}x{}, expected {}x{}",
                matrix.nrows(),
                matrix.ncols(),
                expected.0,
                expected.1
            ),
        ));
    }
    Ok(())
}

/// Builds the input-output table from the assembled square SUT following
/// the byproduct technology construct: byproduct supply acts as negative
/// intermediate demand while each product's own principal production stays
/// on the diagonal.
///
/// The coefficient matrix divides each column of Z by the corresponding
/// diagonal supply; a zero diagonal divides by 1 instead, leaving the
/// column's coefficients equal to its flows.
pub fn make_iot(
    u: &DMatrix<f64>,
    v: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
    info!("Constructing IOT from SUT");
    if !u.is_square() || u.shape() != v.shape() {
        return Err(ModelError::shape_mismatch(
            "make_iot",
            format!(
                "use table is {}x{} and supply table {}x{}, both must be square and equal",
                u.nrows(),
                u.ncols(),
                v.nrows(),
                v.ncols()
            ),
        ));
    }

    let mut z = u - v;
    for i in 0..z.nrows() {
        z[(i, i)] = u[(i, i)];
    }

    let mut a = z.clone();
    for j in 0..a.ncols() {
        let divisor = if v[(j, j)] == 0.0 { 1.0 } else { v[(j, j)] };
        for i in 0..a.nrows() {
            a[(i, j)] /= divisor;
        }
    }
    Ok((z, a))
}
