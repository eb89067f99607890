use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::dashboard::Dashboard;
use crate::db::{get_connection, init_db};
use crate::error::{DashError, Result};
use crate::models::{CompanyRecord, Status};
use crate::settings::load_settings;

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn status_label(company: &CompanyRecord) -> String {
    let label = company.status().as_str();
    match company.status() {
        Status::Ok => label.green().to_string(),
        Status::Warning => label.yellow().to_string(),
        Status::Critical => label.red().bold().to_string(),
    }
}

pub fn run(file: &str) -> Result<()> {
    let file_path = PathBuf::from(file);
    if !file_path.is_file() {
        return Err(DashError::InvalidInput(format!("file not found: {file}")));
    }
    let settings = load_settings();
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    let dashboard = Dashboard::new(conn, settings.sheet_names());
    dashboard.ingest(&file_path)?;
    let snapshot = dashboard.snapshot();

    let mut table = Table::new();
    table.set_header(vec!["Code", "Company", "Contract", "Spent", "Available", "%", "Status"]);
    for c in &snapshot.companies {
        table.add_row(vec![
            Cell::new(&c.code),
            Cell::new(&c.name),
            Cell::new(money(c.contract_value)).set_alignment(CellAlignment::Right),
            Cell::new(money(c.spent_value)).set_alignment(CellAlignment::Right),
            Cell::new(money(c.available())).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", c.percentage())).set_alignment(CellAlignment::Right),
            Cell::new(status_label(c)),
        ]);
    }
    println!("{table}");

    let stats = &snapshot.statistics;
    println!(
        "{} companies, contracted {}, spent {}, average utilization {:.2}%",
        stats.companies_count,
        money(stats.total_contracted),
        money(stats.total_spent),
        stats.average_utilization
    );
    Ok(())
}
