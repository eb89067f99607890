use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use calamine::{Data, Range, Reader};
use tracing::{debug, info};

use crate::error::{DashError, Result};
use crate::models::CompanyRecord;

/// Contract value and spend both live in column G of their tab.
const VALUE_COL: usize = 6;
const MIN_COLS: usize = VALUE_COL + 1;

#[derive(Debug, Clone)]
pub struct SheetNames {
    pub contracts: String,
    pub spend: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            contracts: "VALIDAÇÕES".to_string(),
            spend: "LIQUIDAÇÃO 2025".to_string(),
        }
    }
}

/// Text of a code/name cell. Integral numbers drop their `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Only genuinely numeric cells count; text that looks like a number does not.
fn cell_amount(cell: &Data) -> Option<f64> {
    match cell {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) if f.is_finite() => Some(*f),
        _ => None,
    }
}

/// code -> (name, contract value). Later rows for the same code win.
fn read_contracts(rows: impl Iterator<Item = Vec<Data>>) -> BTreeMap<String, (String, f64)> {
    let mut companies = BTreeMap::new();
    for row in rows.skip(1) {
        if row.len() < MIN_COLS {
            continue;
        }
        let code = cell_text(&row[0]);
        let name = cell_text(&row[1]);
        if code.is_empty() || name.is_empty() {
            continue;
        }
        match cell_amount(&row[VALUE_COL]) {
            Some(value) if value > 0.0 => {
                debug!(%code, %name, value, "contract row");
                companies.insert(code, (name, value));
            }
            _ => continue,
        }
    }
    companies
}

/// code -> summed spend, across every row for that code.
fn read_spend(rows: impl Iterator<Item = Vec<Data>>) -> HashMap<String, f64> {
    let mut spend: HashMap<String, f64> = HashMap::new();
    for row in rows.skip(1) {
        if row.len() < MIN_COLS {
            continue;
        }
        let code = cell_text(&row[1]);
        if code.is_empty() {
            continue;
        }
        if let Some(value) = cell_amount(&row[VALUE_COL]).filter(|v| *v > 0.0) {
            *spend.entry(code).or_insert(0.0) += value;
        }
    }
    spend
}

/// Combine both tabs into a fresh company set sorted by name. Spend for codes
/// that are not on the contract tab is dropped.
fn combine(
    contracts: BTreeMap<String, (String, f64)>,
    spend: &HashMap<String, f64>,
) -> Vec<CompanyRecord> {
    let mut companies: Vec<CompanyRecord> = contracts
        .into_iter()
        .map(|(code, (name, contract))| {
            let spent = spend.get(&code).copied().unwrap_or(0.0);
            CompanyRecord::new(code, name, contract, spent)
        })
        .collect();
    companies.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.code.cmp(&b.code)));
    companies
}

/// Rows of a used range addressed from A1. calamine starts a range at its
/// first non-empty cell, so leading rows and columns are padded back in.
fn sheet_rows(range: &Range<Data>) -> impl Iterator<Item = Vec<Data>> + '_ {
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let leading = std::iter::repeat_with(Vec::new).take(first_row as usize);
    let rows = range.rows().map(move |cells| {
        let mut row = vec![Data::Empty; first_col as usize];
        row.extend_from_slice(cells);
        row
    });
    leading.chain(rows)
}

pub fn parse_workbook(file_path: &Path, sheets: &SheetNames) -> Result<Vec<CompanyRecord>> {
    let mut workbook = calamine::open_workbook_auto(file_path)?;

    let names = workbook.sheet_names();
    for wanted in [&sheets.contracts, &sheets.spend] {
        if !names.iter().any(|n| n == wanted) {
            return Err(DashError::MissingSheet {
                name: wanted.clone(),
                available: names.join(", "),
            });
        }
    }

    let contract_range = workbook.worksheet_range(&sheets.contracts)?;
    let contracts = read_contracts(sheet_rows(&contract_range));
    info!(sheet = %sheets.contracts, companies = contracts.len(), "contract tab read");

    let spend_range = workbook.worksheet_range(&sheets.spend)?;
    let spend = read_spend(sheet_rows(&spend_range));
    info!(sheet = %sheets.spend, codes = spend.len(), "spend tab read");

    Ok(combine(contracts, &spend))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{write_cells, write_workbook, Cell};
    use super::*;

    fn row(cells: &[Data]) -> Vec<Data> {
        cells.to_vec()
    }

    fn contract_row(code: Data, name: &str, value: Data) -> Vec<Data> {
        row(&[
            code,
            Data::String(name.to_string()),
            Data::Empty,
            Data::Empty,
            Data::Empty,
            Data::Empty,
            value,
        ])
    }

    fn header() -> Vec<Data> {
        vec![Data::String("header".to_string()); MIN_COLS]
    }

    #[test]
    fn test_cell_text_drops_integral_fraction() {
        assert_eq!(cell_text(&Data::Float(1234.0)), "1234");
        assert_eq!(cell_text(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::String("  A01 ".to_string())), "A01");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_read_contracts_skips_invalid_rows() {
        let rows = vec![
            header(),
            contract_row(Data::String("001".into()), "Acme", Data::Float(1000.0)),
            contract_row(Data::String("002".into()), "Zero", Data::Float(0.0)),
            contract_row(Data::String("003".into()), "Neg", Data::Float(-5.0)),
            contract_row(Data::String("004".into()), "Text", Data::String("1000".into())),
            contract_row(Data::Empty, "NoCode", Data::Float(10.0)),
            row(&[Data::String("005".into()), Data::String("Short".into())]),
            contract_row(Data::Int(6), "IntCode", Data::Int(300)),
        ];
        let contracts = read_contracts(rows.into_iter());
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts["001"], ("Acme".to_string(), 1000.0));
        assert_eq!(contracts["6"], ("IntCode".to_string(), 300.0));
    }

    #[test]
    fn test_read_spend_sums_per_code() {
        let spend_row = |code: &str, v: f64| {
            row(&[
                Data::Empty,
                Data::String(code.to_string()),
                Data::Empty,
                Data::Empty,
                Data::Empty,
                Data::Empty,
                Data::Float(v),
            ])
        };
        let rows = vec![
            header(),
            spend_row("001", 100.0),
            spend_row("001", 250.5),
            spend_row("002", -10.0),
            spend_row("", 99.0),
        ];
        let spend = read_spend(rows.into_iter());
        assert_eq!(spend.get("001"), Some(&350.5));
        assert!(!spend.contains_key("002"));
        assert_eq!(spend.len(), 1);
    }

    #[test]
    fn test_parse_workbook_merges_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(
            dir.path(),
            "pagamentos.xlsx",
            &[("002", "Zeta Ltda", 2000.0), ("001", "Alpha SA", 1000.0)],
            &[("001", 400.0), ("001", 550.0), ("999", 10.0)],
        );
        let companies = parse_workbook(&path, &SheetNames::default()).unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].name, "Alpha SA");
        assert_eq!(companies[0].spent_value, 950.0);
        assert_eq!(companies[0].percentage(), 95.0);
        assert_eq!(companies[1].code, "002");
        assert_eq!(companies[1].spent_value, 0.0);
    }

    #[test]
    fn test_parse_workbook_missing_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(dir.path(), "p.xlsx", &[("001", "Acme", 1.0)], &[]);
        let sheets = SheetNames {
            contracts: "VALIDAÇÕES".to_string(),
            spend: "LIQUIDAÇÃO 2026".to_string(),
        };
        let err = parse_workbook(&path, &sheets).unwrap_err();
        assert!(matches!(err, DashError::MissingSheet { ref name, .. } if name == "LIQUIDAÇÃO 2026"));
    }

    fn contract_tab(name: &str) -> (&str, Vec<(u32, u16, Cell<'static>)>) {
        (
            name,
            vec![
                (0, 0, Cell::Text("Código")),
                (0, 1, Cell::Text("Empresa")),
                (0, 6, Cell::Text("Valor")),
                (1, 0, Cell::Text("001")),
                (1, 1, Cell::Text("Alpha SA")),
                (1, 6, Cell::Num(1000.0)),
            ],
        )
    }

    #[test]
    fn test_spend_tab_with_empty_first_column() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = SheetNames::default();
        let path = write_cells(
            dir.path(),
            "pagamentos.xlsm",
            &[
                contract_tab(&sheets.contracts),
                (
                    sheets.spend.as_str(),
                    vec![
                        (0, 1, Cell::Text("Código")),
                        (0, 6, Cell::Text("Valor")),
                        (1, 1, Cell::Text("001")),
                        (1, 6, Cell::Num(950.0)),
                    ],
                ),
            ],
        );
        let companies = parse_workbook(&path, &sheets).unwrap();
        assert_eq!(companies[0].spent_value, 950.0);
        assert_eq!(companies[0].status().as_str(), "critical");
    }

    #[test]
    fn test_tab_without_header_row_keeps_first_data_row() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = SheetNames::default();
        let path = write_cells(
            dir.path(),
            "pagamentos.xlsm",
            &[
                contract_tab(&sheets.contracts),
                (
                    sheets.spend.as_str(),
                    vec![
                        (1, 1, Cell::Text("001")),
                        (1, 6, Cell::Num(200.0)),
                        (3, 1, Cell::Text("001")),
                        (3, 6, Cell::Num(50.0)),
                    ],
                ),
            ],
        );
        let companies = parse_workbook(&path, &sheets).unwrap();
        assert_eq!(companies[0].spent_value, 250.0);
    }

    #[test]
    fn test_contract_value_stored_as_text_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = SheetNames::default();
        let (name, mut cells) = contract_tab(&sheets.contracts);
        cells.extend([
            (2, 0, Cell::Text("002")),
            (2, 1, Cell::Text("Beta Ltda")),
            (2, 6, Cell::Text("1500")),
        ]);
        let path = write_cells(
            dir.path(),
            "pagamentos.xlsm",
            &[(name, cells), (sheets.spend.as_str(), vec![(0, 1, Cell::Text("Código"))])],
        );
        let companies = parse_workbook(&path, &sheets).unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].code, "001");
        assert_eq!(companies[0].spent_value, 0.0);
    }
}
