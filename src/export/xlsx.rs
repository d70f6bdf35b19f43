//! Minimal single-sheet SpreadsheetML (.xlsx) writer.
//!
//! Strings are stored inline, prices as numbers. All archive entries carry
//! the zip epoch timestamp so identical tables produce identical bytes.

use crate::error::{AppError, Result};
use crate::models::{COLUMNS, PriceRecord, PriceTable};
use crate::utils::column_letter;
use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub const SHEET_NAME: &str = "价格数据";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape(SHEET_NAME)
    )
}

enum Cell<'a> {
    Text(&'a str),
    Number(String),
}

fn push_row(xml: &mut String, row: usize, cells: &[Cell<'_>]) {
    let _ = write!(xml, r#"<row r="{}">"#, row);
    for (i, cell) in cells.iter().enumerate() {
        let at = format!("{}{}", column_letter(i + 1), row);
        match cell {
            Cell::Text("") => {}
            Cell::Text(s) => {
                let _ = write!(xml, r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#, at, escape(*s));
            }
            Cell::Number(n) => {
                let _ = write!(xml, r#"<c r="{}"><v>{}</v></c>"#, at, n);
            }
        }
    }
    xml.push_str("</row>");
}

fn record_cells<'a>(rec: &'a PriceRecord, date: &'a str) -> Vec<Cell<'a>> {
    vec![
        Cell::Text(&rec.primary_category),
        Cell::Text(rec.secondary_category.as_deref().unwrap_or("")),
        Cell::Text(&rec.product_name),
        Cell::Number(rec.min_price.to_string()),
        Cell::Number(rec.avg_price.to_string()),
        Cell::Number(rec.max_price.to_string()),
        Cell::Text(rec.spec.as_deref().unwrap_or("")),
        Cell::Text(&rec.origin),
        Cell::Text(&rec.unit),
        Cell::Text(date),
    ]
}

fn sheet_xml(table: &PriceTable) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    let header: Vec<Cell<'_>> = COLUMNS.iter().map(|c| Cell::Text(c)).collect();
    push_row(&mut xml, 1, &header);

    for (i, rec) in table.records().iter().enumerate() {
        let date = rec.publish_date.format("%Y-%m-%d").to_string();
        push_row(&mut xml, i + 2, &record_cells(rec, &date));
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

/// XLSX rendering of the table; `path` is only used in error messages.
pub fn xlsx_bytes(table: &PriceTable, path: &Path) -> Result<Vec<u8>> {
    let to_io = |e: zip::result::ZipError| AppError::io(path, std::io::Error::other(e));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(table)),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        zip.start_file(name, options).map_err(to_io)?;
        zip.write_all(body.as_bytes()).map_err(|e| AppError::io(path, e))?;
    }

    Ok(zip.finish().map_err(to_io)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::sample_table;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_package_layout() {
        let bytes = xlsx_bytes(&sample_table(), Path::new("mem.xlsx")).unwrap();
        let archive = ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(names.contains(&part), "missing {part}");
        }
        assert!(read_part(&bytes, "xl/workbook.xml").contains(r#"name="价格数据""#));
    }

    #[test]
    fn test_sheet_cells() {
        let bytes = xlsx_bytes(&sample_table(), Path::new("mem.xlsx")).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");

        assert!(sheet.contains(r#"<c r="A1" t="inlineStr"><is><t>一级分类</t></is></c>"#));
        assert!(sheet.contains(r#"<c r="J1" t="inlineStr"><is><t>发布日期</t></is></c>"#));
        assert!(sheet.contains(r#"<c r="D2"><v>0.5</v></c>"#));
        assert!(sheet.contains(r#"<c r="F3"><v>50</v></c>"#));
        assert!(sheet.contains(r#"<c r="J3" t="inlineStr"><is><t>2025-12-24</t></is></c>"#));
        // blank optional cells are omitted
        assert!(!sheet.contains(r#"<c r="B2""#));
    }

    #[test]
    fn test_text_is_escaped() {
        let sample = sample_table();
        let mut records = sample.records().to_vec();
        records[0].product_name = "A&B <特>".into();
        let table = PriceTable::from_records(sample.range(), records);

        let bytes = xlsx_bytes(&table, Path::new("mem.xlsx")).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("A&amp;B &lt;特&gt;"));
    }
}
