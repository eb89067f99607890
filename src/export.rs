use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook};

use crate::error::Result;
use crate::models::{CompanyRecord, ExpenseEntry};

const CURRENCY: &str = "R$ #,##0.00";
const HEADER_BLUE: u32 = 0x1F4E78;
const TOTAL_GREY: u32 = 0xE7E6E6;
const COLUMN_WIDTHS: [f64; 7] = [12.0, 25.0, 15.0, 15.0, 20.0, 20.0, 20.0];
const HEADERS: [&str; 7] = [
    "Data",
    "Descricao",
    "Categoria",
    "Valor",
    "Quem Registrou",
    "Observacoes",
    "Data de Criacao",
];

pub fn download_name(company_code: &str) -> String {
    format!("Movimentos_{company_code}.xlsx")
}

/// Render the per-company expense report and return the xlsx bytes.
pub fn company_expenses_xlsx(company: &CompanyRecord, expenses: &[ExpenseEntry]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.set_name("Movimentos")?;

    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        ws.set_column_width(col as u16, *width)?;
    }

    let title = Format::new()
        .set_bold()
        .set_font_size(14)
        .set_font_color(Color::RGB(HEADER_BLUE));
    let bold = Format::new().set_bold();
    let bold_11 = Format::new().set_bold().set_font_size(11);
    let small = Format::new().set_font_size(10);
    let money = Format::new().set_num_format(CURRENCY);
    let percent = Format::new().set_num_format("0.00%");
    let header = Format::new()
        .set_bold()
        .set_font_size(12)
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_BLUE))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let cell = Format::new()
        .set_border(FormatBorder::Thin)
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter);
    let cell_money = cell.clone().set_num_format(CURRENCY);
    let total = Format::new()
        .set_border(FormatBorder::Thin)
        .set_background_color(Color::RGB(TOTAL_GREY));
    let total_bold = total.clone().set_bold();
    let total_money = total_bold.clone().set_num_format(CURRENCY);

    ws.merge_range(0, 0, 0, 5, "RELATÓRIO DE MOVIMENTOS", &title)?;
    ws.merge_range(1, 0, 1, 5, &format!("Empresa: {}", company.name), &bold_11)?;
    ws.merge_range(2, 0, 2, 5, &format!("Código: {}", company.code), &small)?;

    ws.write_string_with_format(3, 0, "Data do Relatório:", &bold)?;
    ws.write_string(3, 1, chrono::Local::now().format("%d/%m/%Y %H:%M").to_string())?;
    ws.write_string_with_format(4, 0, "Valor do Contrato:", &bold)?;
    ws.write_number_with_format(4, 1, company.contract_value, &money)?;
    ws.write_string_with_format(5, 0, "Valor Gasto:", &bold)?;
    ws.write_number_with_format(5, 1, company.spent_value, &money)?;
    ws.write_string_with_format(6, 0, "Valor Disponível:", &bold)?;
    ws.write_number_with_format(6, 1, company.available(), &money)?;
    ws.write_string_with_format(7, 0, "Percentual Utilizado:", &bold)?;
    ws.write_number_with_format(7, 1, company.percentage() / 100.0, &percent)?;

    let header_row = 9;
    for (col, text) in HEADERS.iter().enumerate() {
        ws.write_string_with_format(header_row, col as u16, *text, &header)?;
    }

    let mut row = header_row + 1;
    for e in expenses {
        ws.write_string_with_format(row, 0, &e.expense_date, &cell)?;
        ws.write_string_with_format(row, 1, &e.description, &cell)?;
        ws.write_string_with_format(row, 2, &e.category, &cell)?;
        ws.write_number_with_format(row, 3, e.amount, &cell_money)?;
        let author = if e.created_by.is_empty() { "N/A" } else { e.created_by.as_str() };
        ws.write_string_with_format(row, 4, author, &cell)?;
        ws.write_string_with_format(row, 5, &e.notes, &cell)?;
        ws.write_string(row, 6, &e.created_at)?;
        row += 1;
    }

    if !expenses.is_empty() {
        let total_row = row + 1;
        let sum: f64 = expenses.iter().map(|e| e.amount).sum();
        for col in 0..6u16 {
            ws.write_blank(total_row, col, &total)?;
        }
        ws.write_string_with_format(total_row, 1, "TOTAL", &total_bold)?;
        ws.write_number_with_format(total_row, 3, sum, &total_money)?;
    }

    Ok(workbook.save_to_buffer()?)
}
