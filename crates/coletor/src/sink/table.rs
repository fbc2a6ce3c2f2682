//! Pulls the main result table out of a results page.

use scraper::{ElementRef, Html, Selector};

use crate::error::StorageError;
use crate::sanitize::normalize_name;

/// Rows of whitespace-collapsed cell texts, in document order.
///
/// Rows without cells are kept as empty rows; portals use them as separators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest row, in cells.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Whether at least one cell has text.
    pub fn has_content(&self) -> bool {
        self.rows.iter().flatten().any(|c| !c.is_empty())
    }

    /// Whether any row below the header has text.
    pub fn has_body(&self) -> bool {
        self.rows.iter().skip(1).flatten().any(|c| !c.is_empty())
    }
}

fn selector(css: &str) -> Result<Selector, StorageError> {
    Selector::parse(css).map_err(|e| StorageError::Table(format!("selector '{}': {}", css, e)))
}

/// The table with the most rows of its own (rows of nested tables do not
/// count). Ties go to the first one in the document.
pub fn largest_table(html: &str) -> Result<Option<Table>, StorageError> {
    let document = Html::parse_document(html);
    let tables = selector("table")?;
    let rows = selector("tr")?;

    let mut best: Option<(usize, Vec<ElementRef<'_>>)> = None;
    for table in document.select(&tables) {
        let own: Vec<ElementRef<'_>> = table
            .select(&rows)
            .filter(|row| owning_table(*row).map(|t| t.id()) == Some(table.id()))
            .collect();
        if own.len() > best.as_ref().map_or(0, |(n, _)| *n) {
            best = Some((own.len(), own));
        }
    }

    Ok(best.map(|(_, rows)| Table {
        rows: rows.into_iter().map(row_cells).collect(),
    }))
}

fn owning_table(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(cell_text)
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(cell, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(el) = ElementRef::wrap(child) {
            if el.value().name() != "table" {
                collect_text(el, out);
            }
        }
    }
}

/// Whether the page's visible text contains any of `markers`, compared
/// without case or accents.
pub fn contains_marker(html: &str, markers: &[String]) -> bool {
    if markers.is_empty() {
        return false;
    }
    let document = Html::parse_document(html);
    let text = normalize_name(&document.root_element().text().collect::<Vec<_>>().join(" "));
    markers
        .iter()
        .map(|m| normalize_name(m))
        .any(|m| !m.is_empty() && text.contains(&m))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <table id="layout">
            <tr><td>Menu</td></tr>
            <tr><td>
              <table id="data">
                <tr><th>Data</th><th>Parcela</th><th>Valor</th></tr>
                <tr><td>05/06/2024</td><td> FPM   1º decêndio </td><td>1.234,56C</td></tr>
                <tr></tr>
                <tr><td>15/06/2024</td><td>FPM</td><td>99,00D</td></tr>
              </table>
            </td></tr>
          </table>
        </body></html>"#;

    #[test]
    fn test_picks_table_with_most_own_rows() {
        let table = largest_table(PAGE).unwrap().unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows()[0], ["Data", "Parcela", "Valor"]);
        assert_eq!(table.rows()[1][1], "FPM 1º decêndio");
        assert!(table.rows()[2].is_empty());
        assert_eq!(table.width(), 3);
    }

    #[test]
    fn test_nested_table_text_is_excluded() {
        let table = largest_table(
            r#"<table>
                 <tr><td>a</td></tr><tr><td>b</td></tr><tr><td>c</td></tr>
                 <tr><td>outer<table><tr><td>inner</td></tr></table></td></tr>
               </table>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(table.rows()[3], ["outer"]);
    }

    #[test]
    fn test_no_table() {
        assert!(largest_table("<p>nada</p>").unwrap().is_none());
    }

    #[test]
    fn test_header_only_has_no_body() {
        let table = largest_table("<table><tr><th>PROGRAMA</th></tr><tr></tr></table>")
            .unwrap()
            .unwrap();
        assert!(table.has_content());
        assert!(!table.has_body());
    }

    #[test]
    fn test_marker_ignores_case_and_accents() {
        let markers = vec!["NAO FORAM ENCONTRADOS".to_string()];
        assert!(contains_marker(
            "<div>Dados não foram encontrados para o período</div>",
            &markers
        ));
        assert!(!contains_marker("<div>ok</div>", &markers));
        assert!(!contains_marker("<div>x</div>", &[]));
    }
}
