use crate::core::diagnostics::supply_diag_check;
use crate::core::layout::BlockLayout;
use crate::input::{NameRow, ProductNames};
use itertools::Itertools;
use nalgebra::DMatrix;
use tracing::info;

/// Region sentinel for globally scoped market activities.
pub const GLOBAL_REGION: &str = "GLO";

pub const MARKET_NAME_PREFIX: &str = "Market for ";

/// Primary-code prefix shared by all electricity products.
pub const ELECTRICITY_PRODUCT_PREFIX: &str = "p40.11";

/// Primary-code prefix of the electricity byproducts (electricity by coal,
/// by gas, ...) that collapse into the shared electricity market.
pub const ELECTRICITY_BYPRODUCT_PREFIX: &str = "p40.11.";

/// Canonical identity of the shared electricity market.
pub const ELECTRICITY_MARKET_CODE: &str = "m40.11";
pub const ELECTRICITY_MARKET_NAME: &str = "Market for electricity";
pub const ELECTRICITY_MARKET_CODE_SECONDARY: &str = "M_ELEC";

pub const GRID_ELECTRICITY_NAME: &str = "Electricity from the grid";

/// Selects the name-table rows of products that are exclusive byproducts:
/// produced somewhere as a byproduct while no industry in that region
/// produces them as principal product. The same product shows up once per
/// region it is exclusive in. An empty result is a valid outcome.
pub fn find_exclusive_byproducts(
    v_agg: &DMatrix<f64>,
    u_agg: &DMatrix<f64>,
    layout: BlockLayout,
    product_names: &ProductNames,
) -> anyhow::Result<Vec<NameRow>> {
    info!("Checking for exclusive byproducts");
    layout.check_alignment(product_names.table.len(), "find_exclusive_byproducts")?;
    let flags = supply_diag_check(v_agg, u_agg, layout)?;

    let byproduct_rows: Vec<NameRow> = product_names
        .table
        .iter()
        .zip(&flags)
        .filter(|(_, flag)| flag.exclusive_byproduct)
        .map(|(row, _)| row.clone())
        .collect();
    if byproduct_rows.is_empty() {
        info!("No exclusive byproducts found");
    } else {
        info!(
            "Found {} instances of an exclusive byproduct",
            byproduct_rows.len()
        );
    }
    Ok(byproduct_rows)
}

/// Name tables for the synthetic market activities and their products.
#[derive(Clone, Debug, Default)]
pub struct MarketNames {
    /// One row per unique non-electricity exclusive byproduct.
    pub excl_byproducts: Vec<NameRow>,
    /// Market activities for the non-electricity byproducts, globally scoped.
    pub market_names: Vec<NameRow>,
    /// Per-region "electricity from the grid" product rows.
    pub grid_electricity: Vec<NameRow>,
    /// Per-region electricity market activities.
    pub elec_markets: Vec<NameRow>,
}

/// Derives canonical market and grid-product names from the exclusive
/// byproduct list.
///
/// Byproducts are deduplicated across regions (first seen wins) into one
/// globally scoped market each, product codes move into the market
/// namespace, and the electricity byproducts collapse into a single shared
/// electricity market that is then replicated per region. When the byproduct
/// list carries no electricity entry the electricity outputs are empty;
/// downstream stages accept the zero-row blocks.
pub fn build_market_names(byproduct_rows: &[NameRow], region_list: &[String]) -> MarketNames {
    info!("Creating name tables for markets and their products");
    let unique: Vec<&NameRow> = byproduct_rows
        .iter()
        .unique_by(|row| row.name.clone())
        .collect();

    let mut markets: Vec<NameRow> = vec![];
    let mut excl_byproducts: Vec<NameRow> = vec![];
    for row in &unique {
        let mut market = (*row).clone();
        market.region = GLOBAL_REGION.to_owned();
        market.name = format!("{MARKET_NAME_PREFIX}{}", row.name);
        market.code_primary = row.code_primary.replace('p', "m");
        market.code_secondary = row.code_secondary.replace("C_", "M_");
        // the electricity byproducts all supply the same market, so they
        // share one market identity
        if market.code_primary.contains(ELECTRICITY_MARKET_CODE) {
            market.code_primary = ELECTRICITY_MARKET_CODE.to_owned();
            market.name = ELECTRICITY_MARKET_NAME.to_owned();
            market.code_secondary = ELECTRICITY_MARKET_CODE_SECONDARY.to_owned();
        }
        markets.push(market);
        if !row.code_primary.contains(ELECTRICITY_BYPRODUCT_PREFIX) {
            excl_byproducts.push((*row).clone());
        }
    }

    // the collapsed electricity entries now share one name, so deduplicating
    // by name keeps a single electricity market
    let markets: Vec<NameRow> = markets
        .into_iter()
        .unique_by(|market| market.name.clone())
        .collect();

    let elec_markets: Vec<NameRow> = markets
        .iter()
        .find(|market| market.code_primary == ELECTRICITY_MARKET_CODE)
        .map(|template| {
            region_list
                .iter()
                .map(|region| {
                    let mut market = template.clone();
                    market.region = region.clone();
                    market
                })
                .collect()
        })
        .unwrap_or_default();

    let grid_electricity: Vec<NameRow> = elec_markets
        .iter()
        .map(|market| {
            let mut product = market.clone();
            product.name = GRID_ELECTRICITY_NAME.to_owned();
            product.code_primary = market.code_primary.replace('m', "p");
            product.code_secondary = market.code_secondary.replace("M_", "C_");
            product
        })
        .collect();

    // markets are activities, not physical products, so they carry no unit
    let market_names: Vec<NameRow> = markets
        .into_iter()
        .filter(|market| market.code_primary != ELECTRICITY_MARKET_CODE)
        .map(strip_unit)
        .collect();
    let elec_markets: Vec<NameRow> = elec_markets.into_iter().map(strip_unit).collect();

    MarketNames {
        excl_byproducts,
        market_names,
        grid_electricity,
        elec_markets,
    }
}

fn strip_unit(mut row: NameRow) -> NameRow {
    row.unit = None;
    row
}
