#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod input;
pub mod output;
#[cfg(test)]
mod tests;

use crate::core::aggregation::{
    aggregate, build_aggregation_matrix, write_aggregation_report, CaloricWeighting,
    GAS_MANUFACTURE_INDUSTRY,
};
use crate::core::assembly::{assemble_sut, make_iot};
use crate::core::byproducts::{build_market_names, find_exclusive_byproducts, MarketNames};
use crate::core::electricity::build_electricity_grid;
use crate::core::layout::BlockLayout;
use crate::core::markets::build_byproduct_markets;
use crate::input::{
    load_aggregation_table, load_caloric_values, load_product_names, load_supply_use, Config,
    NameRow,
};
use crate::output::Output;
use nalgebra::DMatrix;
use tracing::info;

/// The outputs of one pipeline run: the IOT, its coefficient matrix, the
/// assembled square SUT it was derived from, and the name tables describing
/// the assembled row/column order.
#[derive(Clone, Debug)]
pub struct RunResults {
    pub iot: DMatrix<f64>,
    pub coefficients: DMatrix<f64>,
    pub supply_full: DMatrix<f64>,
    pub use_full: DMatrix<f64>,
    /// Labels for the assembled dimension: original products, then grid
    /// electricity per region, then the global byproduct markets.
    pub full_names: Vec<NameRow>,
    pub market_names: MarketNames,
}

/// Runs the whole SUT-to-IOT transformation: load, aggregate, detect
/// exclusive byproducts, build the electricity grids and byproduct markets,
/// assemble the augmented SUT and derive the IOT.
///
/// The output handle receives the aggregation audit report; pass a
/// [`output::SinkOutput`] to discard it.
pub fn run_model(config: &Config, output: impl Output) -> anyhow::Result<RunResults> {
    info!("Starting the system model");
    let data = &config.exio_data;
    let (v, u) = load_supply_use(&data.ddir, &data.supply, &data.use_table)?;
    let product_names = load_product_names(&data.ddir.join(&data.aggregated_names))?;
    let fine = load_aggregation_table(&data.ddir.join(&data.aggregation_matrix))?;
    let caloric_values = load_caloric_values(&data.ddir.join(&data.calvals_matrix))?;

    let (aggregation, records) =
        build_aggregation_matrix(&fine, &caloric_values, &CaloricWeighting::default())?;
    write_aggregation_report(
        &output,
        &config.project_info.aggregation_report_file,
        &records,
        &[GAS_MANUFACTURE_INDUSTRY],
    )?;
    let (v_agg, u_agg) = aggregate(&v, &u, &aggregation)?;

    let layout = BlockLayout::new(aggregation.regions, aggregation.sectors);
    let byproduct_rows = find_exclusive_byproducts(&v_agg, &u_agg, layout, &product_names)?;
    let market_names = build_market_names(&byproduct_rows, &product_names.country_list);

    let grid = build_electricity_grid(&v_agg, &u_agg, layout, &product_names)?;
    let markets = build_byproduct_markets(
        &grid.v_main,
        &grid.u_main,
        &market_names.excl_byproducts,
        &product_names,
        &byproduct_rows,
        layout,
    )?;

    let (supply_full, use_full) = assemble_sut(&markets, &grid)?;
    let (iot, coefficients) = make_iot(&use_full, &supply_full)?;

    let mut full_names = product_names.table.clone();
    full_names.extend(market_names.grid_electricity.iter().cloned());
    full_names.extend(market_names.market_names.iter().cloned());

    Ok(RunResults {
        iot,
        coefficients,
        supply_full,
        use_full,
        full_names,
        market_names,
    })
}
