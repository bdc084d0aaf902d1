use crate::errors::ModelError;
use crate::input::{AggregationTable, CaloricValues, Label, NATURAL_GAS_CODE};
use crate::output::Output;
use anyhow::anyhow;
use nalgebra::DMatrix;
use std::io::Write;
use std::ops::Range;
use tracing::info;

/// Industry aggregated with caloric-value weights rather than plain sums.
pub const GAS_MANUFACTURE_INDUSTRY: &str = "Manufacture of gas";

/// Column position of the gas-manufacture industry in the fine
/// classification.
pub const GAS_MANUFACTURE_COLUMN: usize = 109;

/// Row positions of the five manufactured-gas byproducts in the fine
/// classification.
pub const GAS_BYPRODUCT_ROWS: Range<usize> = 141..146;

/// Where in the fine classification the caloric weighting applies. The
/// default carries the EXIOBASE positions.
#[derive(Clone, Debug)]
pub struct CaloricWeighting {
    pub industry_column: usize,
    pub product_rows: Range<usize>,
}

impl Default for CaloricWeighting {
    fn default() -> Self {
        Self {
            industry_column: GAS_MANUFACTURE_COLUMN,
            product_rows: GAS_BYPRODUCT_ROWS,
        }
    }
}

/// The full block-diagonal aggregation matrix together with the dimensions
/// threaded through the rest of the pipeline.
#[derive(Clone, Debug)]
pub struct AggregationMatrix {
    pub matrix: DMatrix<f64>,
    pub regions: usize,
    pub products: usize,
    pub sectors: usize,
}

/// One line of the aggregation audit: a fine product contributing to a
/// coarse industry that aggregates more than one product, with its resolved
/// weight.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationRecord {
    pub country: String,
    pub industry: Label,
    pub product_count: usize,
    pub product: Label,
    pub weight: f64,
}

/// Replicates the fine aggregation matrix block-diagonally per region and
/// overwrites the gas-manufacture weights with caloric-value ratios relative
/// to natural gas. The region count is taken from the caloric value table.
///
/// Returns the full matrix and the audit records for every coarse industry
/// aggregating more than one fine product.
pub fn build_aggregation_matrix(
    fine: &AggregationTable,
    caloric_values: &CaloricValues,
    weighting: &CaloricWeighting,
) -> anyhow::Result<(AggregationMatrix, Vec<AggregationRecord>)> {
    let n_reg = caloric_values.region_count();
    let n_prod = fine.matrix.nrows();
    let n_sec = fine.matrix.ncols();
    if n_reg == 0 {
        return Err(anyhow!("caloric value table names no regions"));
    }
    info!("Number of regions: {n_reg}");
    info!("Number of products before aggregation: {n_prod}");
    info!("Number of products after aggregation: {n_sec}");

    if weighting.industry_column >= n_sec
        || weighting.product_rows.end > n_prod
        || weighting.product_rows.end > caloric_values.values.nrows()
    {
        return Err(ModelError::shape_mismatch(
            "build_aggregation_matrix",
            format!(
                "caloric weighting (rows {:?}, column {}) does not fit a {n_prod}x{n_sec} \
                 aggregation matrix with {} caloric value rows",
                weighting.product_rows,
                weighting.industry_column,
                caloric_values.values.nrows(),
            ),
        )
        .into());
    }
    let gas_row = caloric_values
        .natural_gas_row()
        .ok_or_else(|| anyhow!("caloric value table has no {NATURAL_GAS_CODE} row"))?;

    let mut matrix = DMatrix::zeros(n_reg * n_prod, n_reg * n_sec);
    for r in 0..n_reg {
        matrix
            .view_mut((r * n_prod, r * n_sec), (n_prod, n_sec))
            .copy_from(&fine.matrix);
    }

    info!(
        "Inserting caloric values for {}",
        fine.industries
            .get(weighting.industry_column)
            .map(|label| label.name.as_str())
            .unwrap_or(GAS_MANUFACTURE_INDUSTRY)
    );
    for r in 0..n_reg {
        let natural_gas = caloric_values.values[(gas_row, r)];
        for p in weighting.product_rows.clone() {
            matrix[(r * n_prod + p, r * n_sec + weighting.industry_column)] =
                caloric_values.values[(p, r)] / natural_gas;
        }
    }

    let aggregation = AggregationMatrix {
        matrix,
        regions: n_reg,
        products: n_prod,
        sectors: n_sec,
    };
    let records = aggregation_records(fine, &aggregation, &caloric_values.regions);
    Ok((aggregation, records))
}

/// Collects the audit records: per region, per coarse industry aggregating
/// more than one fine product, one record per contributing product with the
/// weight resolved from the full matrix.
fn aggregation_records(
    fine: &AggregationTable,
    aggregation: &AggregationMatrix,
    country_list: &[String],
) -> Vec<AggregationRecord> {
    let n_prod = aggregation.products;
    let n_sec = aggregation.sectors;
    let mut records = vec![];
    for (c, country) in country_list.iter().enumerate() {
        for i in 0..n_sec {
            let contributing: Vec<usize> = (0..n_prod)
                .filter(|&p| fine.matrix[(p, i)] > 0.0)
                .collect();
            if contributing.len() <= 1 {
                continue;
            }
            for &p in &contributing {
                records.push(AggregationRecord {
                    country: country.clone(),
                    industry: fine.industries[i].clone(),
                    product_count: contributing.len(),
                    product: fine.products[p].clone(),
                    weight: aggregation.matrix[(c * n_prod + p, c * n_sec + i)],
                });
            }
        }
    }
    records
}

/// Projects the supply and use tables through the aggregation matrix. Both
/// tables are left-multiplied by the transposed matrix.
pub fn aggregate(
    v: &DMatrix<f64>,
    u: &DMatrix<f64>,
    aggregation: &AggregationMatrix,
) -> Result<(DMatrix<f64>, DMatrix<f64>), ModelError> {
    info!("Aggregating supply and use tables");
    if aggregation.matrix.nrows() != v.nrows() || aggregation.matrix.nrows() != u.nrows() {
        return Err(ModelError::shape_mismatch(
            "aggregate",
            format!(
                "aggregation matrix has {} rows, supply table {} and use table {}",
                aggregation.matrix.nrows(),
                v.nrows(),
                u.nrows()
            ),
        ));
    }
    let v_agg = aggregation.matrix.tr_mul(v);
    let u_agg = aggregation.matrix.tr_mul(u);
    Ok((v_agg, u_agg))
}

/// Writes the aggregation audit as a `|`-delimited text report for human
/// review.
pub fn write_aggregation_report(
    output: &impl Output,
    location_key: &str,
    records: &[AggregationRecord],
    caloric_industries: &[&str],
) -> anyhow::Result<()> {
    let writer = output.writer_for_location_key(location_key)?;
    render_report(writer, records, caloric_industries)?;
    info!("Aggregation report written to {location_key}");
    Ok(())
}

fn render_report(
    mut writer: impl Write,
    records: &[AggregationRecord],
    caloric_industries: &[&str],
) -> std::io::Result<()> {
    writeln!(writer, "# Aggregation report")?;
    writeln!(
        writer,
        "# The following industries were aggregated using caloric values:"
    )?;
    for industry in caloric_industries {
        writeln!(writer, "# {industry}")?;
    }
    writeln!(
        writer,
        "Country code|Industry name|Industry code 1|Industry code 2|\
         Number of products to be aggregated|Product name|Product code 1|\
         Product code 2|Aggregation value"
    )?;
    for record in records {
        writeln!(
            writer,
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            record.country,
            record.industry.name,
            record.industry.code_primary,
            record.industry.code_secondary,
            record.product_count,
            record.product.name,
            record.product.code_primary,
            record.product.code_secondary,
            record.weight,
        )?;
    }
    writer.flush()
}
