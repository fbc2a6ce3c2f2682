//! Minimal single-sheet XLSX writer.
//!
//! Every cell is an inline string. Entry order and timestamps inside the zip
//! container are fixed, so the same rows always produce the same bytes.

use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CellStyle {
    #[default]
    Plain,
    Bold,
    Title,
    /// Credit rows, blue.
    Credit,
    /// Debit rows, red.
    Debit,
}

impl CellStyle {
    fn index(self) -> usize {
        match self {
            CellStyle::Plain => 0,
            CellStyle::Bold => 1,
            CellStyle::Title => 2,
            CellStyle::Credit => 3,
            CellStyle::Debit => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub style: CellStyle,
}

impl Cell {
    pub fn new(text: impl Into<String>, style: CellStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workbook {
    sheet_name: String,
    rows: Vec<Vec<Cell>>,
    widths: Vec<(usize, f64)>,
    /// `(row, first column, last column)`, zero-based.
    merges: Vec<(usize, usize, usize)>,
}

impl Workbook {
    pub fn new(sheet_name: &str) -> Self {
        // Sheet names are limited to 31 characters.
        let sheet_name: String = sheet_name.chars().take(31).collect();
        Self {
            sheet_name,
            rows: vec![],
            widths: vec![],
            merges: vec![],
        }
    }

    pub fn push_row(&mut self, cells: Vec<Cell>) -> &mut Self {
        self.rows.push(cells);
        self
    }

    /// Appends a row whose cells share one style.
    pub fn push_styled<I, S>(&mut self, texts: I, style: CellStyle) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = texts.into_iter().map(|t| Cell::new(t, style)).collect();
        self.push_row(cells)
    }

    pub fn push_blank(&mut self) -> &mut Self {
        self.push_row(vec![])
    }

    /// Merges `first..=last` columns of the most recently pushed row.
    pub fn merge_last_row(&mut self, first: usize, last: usize) -> &mut Self {
        if let Some(row) = self.rows.len().checked_sub(1) {
            if last > first {
                self.merges.push((row, first, last));
            }
        }
        self
    }

    pub fn set_width(&mut self, column: usize, width: f64) -> &mut Self {
        self.widths.retain(|(c, _)| *c != column);
        self.widths.push((column, width));
        self.widths.sort_by_key(|(c, _)| *c);
        self
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let parts = [
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("xl/workbook.xml", self.workbook_xml()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
            ("xl/styles.xml", STYLES.to_string()),
            ("xl/worksheets/sheet1.xml", self.sheet_xml()),
        ];

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(name, options)
                .map_err(|e| StorageError::Workbook(format!("{}: {}", name, e)))?;
            zip.write_all(body.as_bytes())
                .map_err(|e| StorageError::Workbook(format!("{}: {}", name, e)))?;
        }
        let cursor = zip
            .finish()
            .map_err(|e| StorageError::Workbook(e.to_string()))?;
        Ok(cursor.into_inner())
    }

    fn workbook_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
                r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
                r#"<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            ),
            escape(self.sheet_name.as_str())
        )
    }

    fn sheet_xml(&self) -> String {
        let mut xml = String::from(concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#
        ));

        if !self.widths.is_empty() {
            xml.push_str("<cols>");
            for (column, width) in &self.widths {
                xml.push_str(&format!(
                    r#"<col min="{n}" max="{n}" width="{w:.2}" customWidth="1"/>"#,
                    n = column + 1,
                    w = width
                ));
            }
            xml.push_str("</cols>");
        }

        xml.push_str("<sheetData>");
        for (r, row) in self.rows.iter().enumerate() {
            if row.is_empty() {
                xml.push_str(&format!(r#"<row r="{}"/>"#, r + 1));
                continue;
            }
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, cell) in row.iter().enumerate() {
                xml.push_str(&format!(
                    r#"<c r="{}" s="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    cell_ref(r, c),
                    cell.style.index(),
                    escape(cell.text.as_str())
                ));
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData>");

        if !self.merges.is_empty() {
            xml.push_str(&format!(r#"<mergeCells count="{}">"#, self.merges.len()));
            for (row, first, last) in &self.merges {
                xml.push_str(&format!(
                    r#"<mergeCell ref="{}:{}"/>"#,
                    cell_ref(*row, *first),
                    cell_ref(*row, *last)
                ));
            }
            xml.push_str("</mergeCells>");
        }

        xml.push_str("</worksheet>");
        xml
    }
}

/// `A1`-style reference for a zero-based cell.
fn cell_ref(row: usize, column: usize) -> String {
    format!("{}{}", column_name(column), row + 1)
}

fn column_name(column: usize) -> String {
    let mut n = column + 1;
    let mut name = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

const CONTENT_TYPES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
    r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
    r#"</Types>"#
);

const ROOT_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
    r#"</Relationships>"#
);

const WORKBOOK_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
    r#"</Relationships>"#
);

// Font order matches `CellStyle::index`.
const STYLES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    r#"<fonts count="5">"#,
    r#"<font><sz val="11"/><name val="Calibri"/></font>"#,
    r#"<font><b/><sz val="11"/><name val="Calibri"/></font>"#,
    r#"<font><b/><sz val="14"/><name val="Calibri"/></font>"#,
    r#"<font><sz val="11"/><color rgb="FF0000FF"/><name val="Calibri"/></font>"#,
    r#"<font><sz val="11"/><color rgb="FFFF0000"/><name val="Calibri"/></font>"#,
    r#"</fonts>"#,
    r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
    r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
    r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="5">"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
    r#"<xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
    r#"<xf numFmtId="0" fontId="2" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
    r#"<xf numFmtId="0" fontId="3" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
    r#"<xf numFmtId="0" fontId="4" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
    r#"</cellXfs>"#,
    r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
    r#"</styleSheet>"#
);
