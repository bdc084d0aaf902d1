use crate::core::layout::BlockLayout;
use crate::errors::ModelError;
use crate::input::{NameRow, ProductNames};
use nalgebra::{DMatrix, DVector};
use tracing::info;

/// The global byproduct markets split out of the main tables, plus the main
/// tables with the redirected flows removed.
#[derive(Clone, Debug)]
pub struct ByproductMarkets {
    pub v_main: DMatrix<f64>,
    pub u_main: DMatrix<f64>,
    /// Total supply of each market; becomes the market block diagonal of
    /// the assembled supply table. Summed from the principal-production
    /// diagonal of every row sharing the byproduct's product code.
    pub market_supply_totals: DVector<f64>,
    /// What each market activity draws, one column per market.
    pub market_input_mix: DMatrix<f64>,
    /// Byproduct supply each activity feeds into a market, one row per
    /// market.
    pub market_supply_by_activity: DMatrix<f64>,
    /// What each activity buys from a market instead of from the regional
    /// producers, one row per market.
    pub market_use_by_activity: DMatrix<f64>,
}

/// Creates one global market activity per unique exclusive byproduct and
/// redirects the byproduct's buyers and suppliers through it.
///
/// For each byproduct, the regions where it is exclusive are resolved
/// through the country index; the product's use and supply rows in those
/// regions move into the market's vectors and are zeroed in the main
/// tables. A region code absent from the country index is a fatal shape
/// mismatch.
pub fn build_byproduct_markets(
    v: &DMatrix<f64>,
    u: &DMatrix<f64>,
    excl_byproducts: &[NameRow],
    product_names: &ProductNames,
    all_byproduct_rows: &[NameRow],
    layout: BlockLayout,
) -> anyhow::Result<ByproductMarkets> {
    info!(
        "Creating markets for {} exclusive byproducts",
        excl_byproducts.len()
    );
    layout.check_square(v, "build_byproduct_markets")?;
    layout.check_square(u, "build_byproduct_markets")?;
    layout.check_alignment(product_names.table.len(), "build_byproduct_markets")?;

    let total = layout.total();
    let n_markets = excl_byproducts.len();
    let mut v_main = v.clone();
    let mut u_main = u.clone();
    let mut market_supply_totals = DVector::zeros(n_markets);
    let mut market_input_mix = DMatrix::zeros(total, n_markets);
    let mut market_supply_by_activity = DMatrix::zeros(n_markets, total);
    let mut market_use_by_activity = DMatrix::zeros(n_markets, total);

    for (i, byproduct) in excl_byproducts.iter().enumerate() {
        let product_position =
            *product_names
                .product_index
                .get(&byproduct.name)
                .ok_or_else(|| {
                    ModelError::shape_mismatch(
                        "build_byproduct_markets",
                        format!("product {:?} is not in the product index", byproduct.name),
                    )
                })?;

        // the market draws the principal production of every row carrying
        // this product code, regardless of region
        for (j, row) in product_names.table.iter().enumerate() {
            if row.code_primary == byproduct.code_primary {
                market_input_mix[(j, i)] = v[(j, j)];
            }
        }
        market_supply_totals[i] = market_input_mix.column(i).sum();

        // the regions where the product is an exclusive byproduct
        let mut byproduct_regions: Vec<usize> = vec![];
        for row in all_byproduct_rows {
            if row.code_primary != byproduct.code_primary {
                continue;
            }
            let region = *product_names.country_index.get(&row.region).ok_or_else(|| {
                ModelError::shape_mismatch(
                    "build_byproduct_markets",
                    format!("region code {:?} is not in the country index", row.region),
                )
            })?;
            byproduct_regions.push(region);
        }

        for &region in &byproduct_regions {
            let row = layout.flat(region, product_position);
            // every activity that bought the product from one of these
            // regions now buys it from the market
            for j in 0..total {
                market_use_by_activity[(i, j)] += u[(row, j)];
                u_main[(row, j)] = 0.0;
            }
            // the byproduct supply of these regions moves to the market
            for j in 0..total {
                market_supply_by_activity[(i, j)] += v[(row, j)];
                v_main[(row, j)] = 0.0;
            }
        }
    }

    Ok(ByproductMarkets {
        v_main,
        u_main,
        market_supply_totals,
        market_input_mix,
        market_supply_by_activity,
        market_use_by_activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::product_names_from_reader;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn single_region_names() -> ProductNames {
        let csv = "\
Country code,Product name,Product code 1,Product code 2,Unit\n\
NL,Wheat,p01,C_WHEA,tonnes\n\
NL,Straw,p02,C_STRW,tonnes\n\
NL,Gas works gas,p40.02a,C_GASW,TJ\n";
        product_names_from_reader(csv.as_bytes()).unwrap()
    }

    #[rstest]
    fn should_redirect_and_zero_the_byproduct_rows() {
        let names = single_region_names();
        let layout = BlockLayout::new(1, 3);
        let mut v = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 5.0, 8.0]));
        // industry 0 co-produces product 2
        v[(2, 0)] = 2.0;
        let mut u = DMatrix::zeros(3, 3);
        u[(2, 0)] = 1.0;
        u[(2, 1)] = 0.5;
        u[(0, 1)] = 2.0;
        let byproduct = names.table[2].clone();

        let markets = build_byproduct_markets(
            &v,
            &u,
            &[byproduct.clone()],
            &names,
            &[byproduct],
            layout,
        )
        .unwrap();

        // the redirected byproduct supply is gone from the main table
        assert_eq!(markets.v_main[(2, 0)], 0.0);
        assert_eq!(markets.v_main.row(2).sum(), 0.0);
        assert_eq!(markets.u_main.row(2).sum(), 0.0);
        // other flows untouched
        assert_eq!(markets.v_main[(0, 0)], 10.0);
        assert_eq!(markets.u_main[(0, 1)], 2.0);

        // mass balance: redirected equals removed, for use and supply
        assert_relative_eq!(markets.market_use_by_activity.row(0).sum(), 1.5);
        assert_relative_eq!(markets.market_supply_by_activity.row(0).sum(), 10.0);
        assert_relative_eq!(markets.market_supply_by_activity[(0, 0)], 2.0);

        // the market total follows the literal diagonal rule: the principal
        // production of every row carrying the product code
        assert_relative_eq!(markets.market_supply_totals[0], 8.0);
        assert_relative_eq!(markets.market_input_mix[(2, 0)], 8.0);
    }

    #[rstest]
    fn should_sum_buyers_across_all_byproduct_regions() {
        let csv = "\
Country code,Product name,Product code 1,Product code 2,Unit\n\
NL,Wheat,p01,C_WHEA,tonnes\n\
NL,Gas works gas,p40.02a,C_GASW,TJ\n\
DE,Wheat,p01,C_WHEA,tonnes\n\
DE,Gas works gas,p40.02a,C_GASW,TJ\n";
        let names = product_names_from_reader(csv.as_bytes()).unwrap();
        let layout = BlockLayout::new(2, 2);
        let mut v = DMatrix::zeros(4, 4);
        v[(0, 0)] = 10.0;
        v[(1, 0)] = 2.0;
        v[(2, 2)] = 7.0;
        v[(3, 2)] = 1.0;
        let mut u = DMatrix::zeros(4, 4);
        u[(1, 0)] = 0.5;
        u[(1, 2)] = 0.25;
        u[(3, 3)] = 4.0;
        // exclusive in both regions
        let all_rows = vec![names.table[1].clone(), names.table[3].clone()];
        let excl = vec![names.table[1].clone()];

        let markets =
            build_byproduct_markets(&v, &u, &excl, &names, &all_rows, layout).unwrap();

        // both regions' use rows feed the one market
        assert_relative_eq!(markets.market_use_by_activity.row(0).sum(), 4.75);
        assert_eq!(markets.u_main.row(1).sum(), 0.0);
        assert_eq!(markets.u_main.row(3).sum(), 0.0);
        assert_relative_eq!(markets.market_supply_by_activity.row(0).sum(), 3.0);
        assert_eq!(markets.v_main.row(1).sum(), 0.0);
        assert_eq!(markets.v_main.row(3).sum(), 0.0);
        // principal producers elsewhere keep their diagonals
        assert_eq!(markets.v_main[(0, 0)], 10.0);
        assert_eq!(markets.v_main[(2, 2)], 7.0);
    }

    #[rstest]
    fn should_reject_unknown_region_codes() {
        let names = single_region_names();
        let layout = BlockLayout::new(1, 3);
        let v = DMatrix::zeros(3, 3);
        let u = DMatrix::zeros(3, 3);
        let mut stray = names.table[2].clone();
        stray.region = "XX".into();
        let error = build_byproduct_markets(
            &v,
            &u,
            &[names.table[2].clone()],
            &names,
            &[stray],
            layout,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ModelError>(),
            Some(ModelError::ShapeMismatch { .. })
        ));
    }

    #[rstest]
    fn should_pass_tables_through_unchanged_without_byproducts() {
        let names = single_region_names();
        let layout = BlockLayout::new(1, 3);
        let v = DMatrix::from_element(3, 3, 1.0);
        let u = DMatrix::from_element(3, 3, 2.0);
        let markets = build_byproduct_markets(&v, &u, &[], &names, &[], layout).unwrap();
        assert_eq!(markets.v_main, v);
        assert_eq!(markets.u_main, u);
        assert_eq!(markets.market_supply_totals.len(), 0);
        assert_eq!(markets.market_input_mix.shape(), (3, 0));
    }
}
