use crate::errors::ModelError;
use anyhow::{anyhow, Context};
use csv::ReaderBuilder as CsvReaderBuilder;
use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::info;

// EXIOBASE SUT exports carry four header rows (region, name and two code
// levels for each industry column) and five leading index columns.
const SUT_HEADER_ROWS: usize = 4;
const SUT_INDEX_COLUMNS: usize = 5;

// The fine aggregation matrix carries three header rows (industry name and
// two codes) and four leading index columns (group, product name, two codes).
const AGGREGATION_HEADER_ROWS: usize = 3;
const AGGREGATION_INDEX_COLUMNS: usize = 4;

// The caloric value table has its region-code header on the fifth line.
const CALORIC_HEADER_ROW: usize = 4;
const CALORIC_INDEX_COLUMNS: usize = 4;

/// Secondary product code identifying the natural gas row of the caloric
/// value table.
pub const NATURAL_GAS_CODE: &str = "C_GASE";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub exio_data: ExioDataConfig,
    pub project_info: ProjectInfo,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExioDataConfig {
    /// Directory holding all the source tables.
    pub ddir: PathBuf,
    pub supply: String,
    #[serde(rename = "use")]
    pub use_table: String,
    pub aggregated_names: String,
    pub aggregation_matrix: String,
    pub calvals_matrix: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProjectInfo {
    pub project_name: String,
    pub project_outdir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub aggregation_report_file: String,
}

impl ProjectInfo {
    /// Reports and logs go to the log directory when one is set, otherwise
    /// to the project output directory.
    pub fn report_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(&self.project_outdir)
    }
}

pub fn config_from_json(input: impl Read) -> anyhow::Result<Config> {
    serde_json::from_reader(input).context("Could not parse the configuration file")
}

/// One row of a product/industry name table. Row order aligns with the
/// flattened (region, product) matrix axis. Markets are activities rather
/// than physical products and carry no unit.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NameRow {
    #[serde(rename = "Country code")]
    pub region: String,
    #[serde(rename = "Product name")]
    pub name: String,
    #[serde(rename = "Product code 1")]
    pub code_primary: String,
    #[serde(rename = "Product code 2")]
    pub code_secondary: String,
    #[serde(rename = "Unit", default)]
    pub unit: Option<String>,
}

/// The aggregated product name table together with lookup indexes. The
/// country index maps region codes to region positions and the product index
/// maps product names to their local (within-region) position; both keep the
/// order in which entries first appear in the table.
#[derive(Clone, Debug)]
pub struct ProductNames {
    pub table: Vec<NameRow>,
    pub country_index: IndexMap<String, usize>,
    pub product_index: IndexMap<String, usize>,
    pub country_list: Vec<String>,
}

/// Name, primary code and secondary code of a fine product or industry in
/// the aggregation table.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub name: String,
    pub code_primary: String,
    pub code_secondary: String,
}

/// The single-region 0/1 aggregation matrix with its row (product) and
/// column (industry) labels.
#[derive(Clone, Debug)]
pub struct AggregationTable {
    pub matrix: DMatrix<f64>,
    pub products: Vec<Label>,
    pub industries: Vec<Label>,
}

/// Caloric values per fine product row and region. Missing entries are
/// filled with 1.0 at load time.
#[derive(Clone, Debug)]
pub struct CaloricValues {
    pub values: DMatrix<f64>,
    pub product_codes: Vec<String>,
    pub regions: Vec<String>,
}

impl CaloricValues {
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Row position of natural gas, the reference product for the caloric
    /// weighting.
    pub fn natural_gas_row(&self) -> Option<usize> {
        self.product_codes
            .iter()
            .position(|code| code == NATURAL_GAS_CODE)
    }
}

fn open_checked(path: &Path) -> Result<BufReader<File>, ModelError> {
    if !path.exists() {
        return Err(ModelError::missing_file(path));
    }
    // Races between the existence check and the open are not a concern for
    // this batch tool; the check exists to give a typed error.
    File::open(path)
        .map(BufReader::new)
        .map_err(|_| ModelError::missing_file(path))
}

/// Reads the supply and use tables from their CSV exports. Both must share
/// one shape.
pub fn load_supply_use(
    dir: &Path,
    v_name: &str,
    u_name: &str,
) -> anyhow::Result<(DMatrix<f64>, DMatrix<f64>)> {
    let v_path = dir.join(v_name);
    let u_path = dir.join(u_name);
    info!("Reading supply table from {}", v_path.display());
    let v = sut_from_reader(open_checked(&v_path)?)
        .with_context(|| format!("while reading {}", v_path.display()))?;
    info!("Reading use table from {}", u_path.display());
    let u = sut_from_reader(open_checked(&u_path)?)
        .with_context(|| format!("while reading {}", u_path.display()))?;
    if v.shape() != u.shape() {
        return Err(ModelError::shape_mismatch(
            "load_supply_use",
            format!(
                "supply table is {}x{} but use table is {}x{}",
                v.nrows(),
                v.ncols(),
                u.nrows(),
                u.ncols()
            ),
        )
        .into());
    }
    Ok((v, u))
}

pub fn sut_from_reader(input: impl Read) -> anyhow::Result<DMatrix<f64>> {
    numeric_table_from_reader(input, SUT_HEADER_ROWS, SUT_INDEX_COLUMNS)
}

fn numeric_table_from_reader(
    input: impl Read,
    header_rows: usize,
    index_columns: usize,
) -> anyhow::Result<DMatrix<f64>> {
    let mut reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(input);

    let mut data: Vec<f64> = vec![];
    let mut width: Option<usize> = None;
    let mut rows = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i < header_rows {
            continue;
        }
        let values = record
            .iter()
            .skip(index_columns)
            .map(|cell| {
                cell.trim()
                    .parse::<f64>()
                    .map_err(|e| anyhow!("row {}: bad numeric cell {cell:?}: {e}", i + 1))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;
        match width {
            None => width = Some(values.len()),
            Some(w) if w != values.len() => {
                return Err(anyhow!(
                    "row {} has {} value columns, expected {w}",
                    i + 1,
                    values.len()
                ))
            }
            _ => {}
        }
        data.extend(values);
        rows += 1;
    }
    let width = width.unwrap_or(0);
    Ok(DMatrix::from_row_iterator(rows, width, data))
}

/// Loads the aggregated product name table and builds the country and
/// product lookup indexes from it.
pub fn load_product_names(path: &Path) -> anyhow::Result<ProductNames> {
    info!("Loading aggregated product names from {}", path.display());
    product_names_from_reader(open_checked(path)?)
        .with_context(|| format!("while reading {}", path.display()))
}

pub fn product_names_from_reader(input: impl Read) -> anyhow::Result<ProductNames> {
    let mut reader = CsvReaderBuilder::new().from_reader(input);
    let table = reader
        .deserialize::<NameRow>()
        .collect::<Result<Vec<_>, _>>()?;

    let mut country_index: IndexMap<String, usize> = IndexMap::new();
    let mut product_index: IndexMap<String, usize> = IndexMap::new();
    for row in &table {
        let next = country_index.len();
        country_index.entry(row.region.clone()).or_insert(next);
        let next = product_index.len();
        product_index.entry(row.name.clone()).or_insert(next);
    }
    let country_list = country_index.keys().cloned().collect();

    Ok(ProductNames {
        table,
        country_index,
        product_index,
        country_list,
    })
}

/// Loads the fine (single-region) aggregation matrix with its product and
/// industry labels.
pub fn load_aggregation_table(path: &Path) -> anyhow::Result<AggregationTable> {
    info!("Reading aggregation matrix from {}", path.display());
    aggregation_table_from_reader(open_checked(path)?)
        .with_context(|| format!("while reading {}", path.display()))
}

pub fn aggregation_table_from_reader(input: impl Read) -> anyhow::Result<AggregationTable> {
    let mut reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(input);

    let mut header_rows: Vec<Vec<String>> = vec![];
    let mut products: Vec<Label> = vec![];
    let mut data: Vec<f64> = vec![];
    let mut width: Option<usize> = None;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i < AGGREGATION_HEADER_ROWS {
            header_rows.push(
                record
                    .iter()
                    .skip(AGGREGATION_INDEX_COLUMNS)
                    .map(str::to_owned)
                    .collect(),
            );
            continue;
        }
        let cells: Vec<&str> = record.iter().collect();
        if cells.len() < AGGREGATION_INDEX_COLUMNS {
            return Err(anyhow!("row {} has no index columns", i + 1));
        }
        products.push(Label {
            name: cells[1].to_owned(),
            code_primary: cells[2].to_owned(),
            code_secondary: cells[3].to_owned(),
        });
        let values = cells[AGGREGATION_INDEX_COLUMNS..]
            .iter()
            .map(|cell| {
                cell.trim()
                    .parse::<f64>()
                    .map_err(|e| anyhow!("row {}: bad aggregation weight {cell:?}: {e}", i + 1))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;
        match width {
            None => width = Some(values.len()),
            Some(w) if w != values.len() => {
                return Err(anyhow!(
                    "row {} has {} weight columns, expected {w}",
                    i + 1,
                    values.len()
                ))
            }
            _ => {}
        }
        data.extend(values);
    }

    if header_rows.len() < AGGREGATION_HEADER_ROWS {
        return Err(anyhow!("aggregation matrix is missing its header rows"));
    }
    let width = width.unwrap_or(0);
    let industries = (0..width)
        .map(|i| Label {
            name: header_rows[0].get(i).cloned().unwrap_or_default(),
            code_primary: header_rows[1].get(i).cloned().unwrap_or_default(),
            code_secondary: header_rows[2].get(i).cloned().unwrap_or_default(),
        })
        .collect();
    let matrix = DMatrix::from_row_iterator(products.len(), width, data);

    Ok(AggregationTable {
        matrix,
        products,
        industries,
    })
}

/// Loads the caloric value table. Blank cells default to 1.0 so products
/// without a known caloric value aggregate with weight 1.
pub fn load_caloric_values(path: &Path) -> anyhow::Result<CaloricValues> {
    info!("Reading caloric values from {}", path.display());
    caloric_values_from_reader(open_checked(path)?)
        .with_context(|| format!("while reading {}", path.display()))
}

pub fn caloric_values_from_reader(input: impl Read) -> anyhow::Result<CaloricValues> {
    let mut reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(input);

    let mut regions: Vec<String> = vec![];
    let mut product_codes: Vec<String> = vec![];
    let mut data: Vec<f64> = vec![];
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i < CALORIC_HEADER_ROW {
            continue;
        }
        if i == CALORIC_HEADER_ROW {
            regions = record
                .iter()
                .skip(CALORIC_INDEX_COLUMNS)
                .map(str::to_owned)
                .collect();
            continue;
        }
        let cells: Vec<&str> = record.iter().collect();
        if cells.len() < CALORIC_INDEX_COLUMNS {
            return Err(anyhow!("row {} has no index columns", i + 1));
        }
        product_codes.push(cells[CALORIC_INDEX_COLUMNS - 1].to_owned());
        for r in 0..regions.len() {
            let cell = cells.get(CALORIC_INDEX_COLUMNS + r).copied().unwrap_or("");
            let value = if cell.trim().is_empty() {
                1.0
            } else {
                cell.trim()
                    .parse::<f64>()
                    .map_err(|e| anyhow!("row {}: bad caloric value {cell:?}: {e}", i + 1))?
            };
            data.push(value);
        }
    }
    if regions.is_empty() {
        return Err(anyhow!("caloric value table is missing its header row"));
    }
    let values = DMatrix::from_row_iterator(product_codes.len(), regions.len(), data);

    Ok(CaloricValues {
        values,
        product_codes,
        regions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn should_parse_config_from_json() {
        let json = r#"{
            "exio_data": {
                "ddir": "/data/exio",
                "supply": "supply.csv",
                "use": "use.csv",
                "aggregated_names": "names.csv",
                "aggregation_matrix": "aggregation.csv",
                "calvals_matrix": "calvals.csv"
            },
            "project_info": {
                "project_name": "test",
                "project_outdir": "/tmp/out",
                "log_dir": null,
                "aggregation_report_file": "aggregation_report.txt"
            }
        }"#;
        let config = config_from_json(json.as_bytes()).unwrap();
        assert_eq!(config.exio_data.use_table, "use.csv");
        assert_eq!(config.project_info.report_dir(), Path::new("/tmp/out"));
    }

    #[rstest]
    fn should_error_on_missing_input_file() {
        let error = load_supply_use(Path::new("/nonexistent"), "v.csv", "u.csv").unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ModelError>(),
            Some(ModelError::MissingInputFile { .. })
        ));
    }

    #[rstest]
    fn should_parse_sut_body_after_headers_and_index_columns() {
        let csv = "\
h,h,h,h,h,h,h\n\
h,h,h,h,h,h,h\n\
h,h,h,h,h,h,h\n\
h,h,h,h,h,h,h\n\
NL,Wheat,p01,C_W,t,1.0,2.0\n\
NL,Power,p40,C_P,TJ,3.0,4.0\n";
        let matrix = sut_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix[(0, 1)], 2.0);
        assert_eq!(matrix[(1, 0)], 3.0);
    }

    #[rstest]
    fn should_build_first_seen_indexes_from_name_table() {
        let csv = "\
Country code,Product name,Product code 1,Product code 2,Unit\n\
NL,Wheat,p01,C_WHEA,tonnes\n\
NL,Electricity by coal,p40.11.a,C_POWC,TJ\n\
DE,Wheat,p01,C_WHEA,tonnes\n\
DE,Electricity by coal,p40.11.a,C_POWC,TJ\n";
        let names = product_names_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(names.table.len(), 4);
        assert_eq!(names.country_list, vec!["NL", "DE"]);
        assert_eq!(names.country_index["DE"], 1);
        assert_eq!(names.product_index["Wheat"], 0);
        assert_eq!(names.product_index["Electricity by coal"], 1);
        assert_eq!(names.table[1].unit.as_deref(), Some("TJ"));
    }

    #[rstest]
    fn should_parse_aggregation_table_with_labels() {
        let csv = "\
idx,name,c1,c2,Agriculture,Power\n\
idx,name,c1,c2,i01,i40\n\
idx,name,c1,c2,A_AGRI,A_POWR\n\
1,Wheat,p01,C_WHEA,1,0\n\
2,Maize,p02,C_MAIZ,1,0\n\
3,Electricity,p40,C_POWR,0,1\n";
        let table = aggregation_table_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.matrix.shape(), (3, 2));
        assert_eq!(table.matrix[(0, 0)], 1.0);
        assert_eq!(table.matrix[(2, 1)], 1.0);
        assert_eq!(table.products[1].name, "Maize");
        assert_eq!(table.industries[1].code_secondary, "A_POWR");
    }

    #[rstest]
    fn should_default_missing_caloric_values_to_one() {
        let csv = "\
junk\n\
junk\n\
junk\n\
junk\n\
idx,name,c1,c2,NL,DE\n\
1,Gas a,p40.02a,C_GASA,0.0387,\n\
2,Natural gas,p40.00,C_GASE,0.048,0.048\n";
        let calvals = caloric_values_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(calvals.regions, vec!["NL", "DE"]);
        assert_eq!(calvals.values[(0, 1)], 1.0);
        assert_eq!(calvals.values[(0, 0)], 0.0387);
        assert_eq!(calvals.natural_gas_row(), Some(1));
    }
}
