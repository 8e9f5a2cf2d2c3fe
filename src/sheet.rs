//! Minimal XLSX reader: the cell grid of the first worksheet.
//!
//! Only what lead exports need is understood: shared strings (including
//! rich-text runs), inline strings, formula string results and raw numeric
//! values. Styles, dates and merged cells are ignored; a value is returned
//! exactly as stored in the sheet XML.

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use std::io::Cursor;

use crate::archive::read_entry_bounded;

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

/// One sheet row; index = zero-based column, `None` = empty cell.
pub type SheetRow = Vec<Option<String>>;

/// Read every row of the first worksheet in `bytes`, in document order.
///
/// `max_entry_bytes` bounds each decompressed XML part.
pub fn read_first_sheet(bytes: &[u8], max_entry_bytes: u64) -> Result<Vec<SheetRow>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("xlsx is not a valid zip container")?;

    let shared = if archive.file_names().any(|n| n == SHARED_STRINGS) {
        let xml = read_entry_bounded(&mut archive, SHARED_STRINGS, max_entry_bytes)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet = match first_worksheet_name(&archive) {
        Some(name) => name,
        None => bail!("xlsx contains no worksheets"),
    };
    let xml = read_entry_bounded(&mut archive, &sheet, max_entry_bytes)?;
    read_sheet_rows(&xml, &shared)
}

fn first_worksheet_name<R: std::io::Read + std::io::Seek>(
    archive: &zip::ZipArchive<R>,
) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("sharedStrings.xml: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `"AB12"` → zero-based column 27.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for b in letters {
        col = col
            .checked_mul(26)?
            .checked_add((b.to_ascii_uppercase() - b'A') as usize + 1)?;
    }
    Some(col - 1)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

struct Cell {
    col: usize,
    kind: Option<String>,
    value: String,
    has_value: bool,
}

fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<SheetRow>> {
    let mut rows = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Option<SheetRow> = None;
    let mut next_col = 0usize;
    let mut cell: Option<Cell> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Some(Vec::new());
                    next_col = 0;
                }
                b"c" if row.is_some() => {
                    let col = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_col);
                    cell = Some(Cell {
                        col,
                        kind: attr(&e, b"t"),
                        value: String::new(),
                        has_value: false,
                    });
                }
                b"v" | b"t" => in_text = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                // <row/> has no cells; keep it so row numbering stays positional.
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    next_col = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_col)
                        + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&te.unescape().unwrap_or_default());
                    c.has_value = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_text = false,
                b"c" => {
                    if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                        next_col = c.col + 1;
                        let value = resolve_cell(&c, shared);
                        if r.len() <= c.col {
                            r.resize(c.col + 1, None);
                        }
                        r[c.col] = value;
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("worksheet xml: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve_cell(cell: &Cell, shared: &[String]) -> Option<String> {
    if !cell.has_value {
        return None;
    }
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned()),
        _ => Some(cell.value.clone()),
    }
}
