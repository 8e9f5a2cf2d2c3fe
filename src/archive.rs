//! Source archives: member selection and row decoding.
//!
//! An archive is a zip file of lead exports. Members are selected with a
//! glob pattern matched against the full member path, in archive order.
//! Each member is decoded by extension:
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.xlsx` | first worksheet, see [`crate::sheet`] |
//! | `.tsv` | tab-delimited text |
//! | anything else | comma-delimited text |
//!
//! The first row of every member is the header. A data row with more
//! fields than the header, or one the reader cannot decode, is yielded as
//! [`SourceRow::Malformed`] so callers can count it and move on.

use anyhow::{bail, Context, Result};
use globset::Glob;
use lead_search_core::models::RawRow;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use crate::sheet;

/// Read a zip entry fully, failing if it decompresses past `max_bytes`.
pub fn read_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("archive member not found: {}", name))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut out)
        .with_context(|| format!("failed to read archive member {}", name))?;
    if out.len() as u64 > max_bytes {
        bail!(
            "archive member {} exceeds size limit ({} bytes)",
            name,
            max_bytes
        );
    }
    Ok(out)
}

pub struct SourceArchive {
    path: PathBuf,
    zip: zip::ZipArchive<BufReader<File>>,
}

impl SourceArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("unreadable archive: {}", path.display()))?;
        let zip = zip::ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("unreadable archive: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
        })
    }

    /// Member names matching `pattern`, in archive order. Directories are
    /// never selected. Zero matches is an error.
    pub fn select(&mut self, pattern: &str) -> Result<Vec<String>> {
        let matcher = Glob::new(pattern)
            .with_context(|| format!("invalid member pattern: {}", pattern))?
            .compile_matcher();

        let mut selected = Vec::new();
        for i in 0..self.zip.len() {
            let entry = self.zip.by_index_raw(i)?;
            if entry.is_dir() {
                continue;
            }
            if matcher.is_match(entry.name()) {
                selected.push(entry.name().to_string());
            }
        }

        if selected.is_empty() {
            bail!(
                "pattern '{}' matched no members in {}",
                pattern,
                self.path.display()
            );
        }
        Ok(selected)
    }

    pub fn read_member(&mut self, name: &str, max_bytes: u64) -> Result<Vec<u8>> {
        read_entry_bounded(&mut self.zip, name, max_bytes)
    }

    /// Read and decode one member into its rows.
    pub fn member_rows(&mut self, name: &str, max_bytes: u64) -> Result<MemberRows> {
        let bytes = self.read_member(name, max_bytes)?;
        MemberRows::decode(name, bytes, max_bytes)
    }
}

/// One data row of a member.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRow {
    Parsed(RawRow),
    Malformed,
}

enum RowSource {
    Delimited(csv::ByteRecordsIntoIter<Cursor<Vec<u8>>>),
    Sheet(std::vec::IntoIter<sheet::SheetRow>),
}

/// Iterator over the data rows of one member, header excluded.
pub struct MemberRows {
    headers: Vec<String>,
    source: RowSource,
}

impl MemberRows {
    pub fn decode(name: &str, bytes: Vec<u8>, max_bytes: u64) -> Result<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".xlsx") {
            let rows = sheet::read_first_sheet(&bytes, max_bytes)
                .with_context(|| format!("failed to read spreadsheet {}", name))?;
            let mut rows = rows.into_iter();
            let headers: Vec<String> = rows
                .next()
                .map(|h| {
                    h.into_iter()
                        .map(|c| c.unwrap_or_default().trim().to_string())
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Self {
                headers,
                source: RowSource::Sheet(rows),
            });
        }

        let delimiter = if lower.ends_with(".tsv") { b'\t' } else { b',' };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(Cursor::new(bytes));
        let headers: Vec<String> = reader
            .byte_headers()
            .with_context(|| format!("failed to read header of {}", name))?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = String::from_utf8_lossy(h);
                let h: &str = &h;
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect();
        Ok(Self {
            headers,
            source: RowSource::Delimited(reader.into_byte_records()),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn to_row(&self, fields: Vec<Option<String>>) -> SourceRow {
        if fields.len() > self.headers.len() {
            return SourceRow::Malformed;
        }
        let mut row = RawRow::new();
        for (header, field) in self.headers.iter().zip(fields) {
            let Some(value) = field else {
                continue;
            };
            if header.is_empty() {
                continue;
            }
            // Duplicate headers: the first non-empty value wins.
            match row.get(header) {
                Some(existing) if !existing.trim().is_empty() => {}
                _ => {
                    row.insert(header.clone(), value);
                }
            }
        }
        SourceRow::Parsed(row)
    }
}

impl Iterator for MemberRows {
    type Item = SourceRow;

    fn next(&mut self) -> Option<SourceRow> {
        let fields = match &mut self.source {
            RowSource::Delimited(records) => match records.next()? {
                Ok(record) => record
                    .iter()
                    .map(|f| Some(String::from_utf8_lossy(f).into_owned()))
                    .collect(),
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable delimited row");
                    return Some(SourceRow::Malformed);
                }
            },
            RowSource::Sheet(rows) => rows.next()?,
        };
        Some(self.to_row(fields))
    }
}
