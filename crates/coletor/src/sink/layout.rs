//! Workbook layouts for the portals whose result is an HTML table.

use std::sync::LazyLock;

use regex::Regex;

use super::table::Table;
use super::xlsx::{Cell, CellStyle, Workbook};
use crate::job::Period;

pub const FEDERAL_TRANSFER_TITLE: &str = "DEMONSTRATIVO DE DISTRIBUIÇÃO DA ARRECADAÇÃO FEDERAL";
pub const FEDERAL_TRANSFER_HEADERS: [&str; 3] = ["DATA", "PARCELA", "VALOR DISTRIBUÍDO (R$)"];

/// Sign of a distributed amount, taken from its trailing `C`/`D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Credit,
    Debit,
}

impl Entry {
    pub fn of(value: &str) -> Option<Self> {
        match value.trim().chars().last().map(|c| c.to_ascii_uppercase()) {
            Some('C') => Some(Entry::Credit),
            Some('D') => Some(Entry::Debit),
            _ => None,
        }
    }

    fn style(self) -> CellStyle {
        match self {
            Entry::Credit => CellStyle::Credit,
            Entry::Debit => CellStyle::Debit,
        }
    }
}

/// One line of a federal transfer demonstrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRow {
    pub date: String,
    pub installment: String,
    pub value: String,
}

impl TransferRow {
    pub fn entry(&self) -> Option<Entry> {
        Entry::of(&self.value)
    }
}

static RE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(R\$)?\s*[\d.]+,\d{2}\s*[CDcd]$").unwrap());

/// Keeps the rows whose last cell is an amount (`1.234,56C`). The date
/// column is only filled on the first row of each day on the portal, so it
/// is carried forward.
pub fn transfer_rows(table: &Table) -> Vec<TransferRow> {
    let mut rows = Vec::new();
    let mut current_date = String::new();
    for cells in table.rows() {
        if cells.len() < 3 {
            continue;
        }
        let value = cells[cells.len() - 1].trim();
        if !RE_AMOUNT.is_match(value) {
            continue;
        }
        let date = cells[0].trim();
        if !date.is_empty() {
            current_date = date.to_string();
        }
        rows.push(TransferRow {
            date: current_date.clone(),
            installment: cells[1].trim().to_string(),
            value: value.to_string(),
        });
    }
    rows
}

/// Municipality title, canonical title, period line, column headers, then one
/// row per amount coloured by its sign.
pub fn federal_transfer_workbook(
    municipality: &str,
    period: &Period,
    rows: &[TransferRow],
) -> Workbook {
    let mut book = Workbook::new(municipality);
    book.push_styled([municipality], CellStyle::Title)
        .merge_last_row(0, 2)
        .push_styled([FEDERAL_TRANSFER_TITLE], CellStyle::Bold)
        .merge_last_row(0, 2)
        .push_styled([format!("Período: {}", period)], CellStyle::Plain)
        .merge_last_row(0, 2)
        .push_blank()
        .push_styled(FEDERAL_TRANSFER_HEADERS, CellStyle::Bold);

    for row in rows {
        let style = row.entry().map_or(CellStyle::Plain, Entry::style);
        book.push_row(vec![
            Cell::new(row.date.as_str(), style),
            Cell::new(row.installment.as_str(), style),
            Cell::new(row.value.as_str(), style),
        ]);
    }

    book.set_width(0, 14.0).set_width(1, 40.0).set_width(2, 26.0);
    book
}

/// Title row, then every table row as found (blank separators included).
/// The first table row is the header.
pub fn educational_fund_workbook(municipality: &str, year: i32, table: &Table) -> Workbook {
    let width = table.width().max(1);
    let mut book = Workbook::new(&format!("{} {}", year, municipality));
    book.push_styled([format!("{} - {}", municipality, year)], CellStyle::Title)
        .merge_last_row(0, width - 1)
        .push_blank();

    for (i, row) in table.rows().iter().enumerate() {
        let style = if i == 0 {
            CellStyle::Bold
        } else {
            CellStyle::Plain
        };
        book.push_styled(row.iter().map(String::as_str), style);
    }

    for (column, width) in column_widths(table).into_iter().enumerate() {
        book.set_width(column, width);
    }
    book
}

fn column_widths(table: &Table) -> Vec<f64> {
    let mut widths = vec![8.0_f64; table.width()];
    for row in table.rows() {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count() as f64 + 2.0;
            widths[i] = widths[i].max(len.min(60.0));
        }
    }
    widths
}
