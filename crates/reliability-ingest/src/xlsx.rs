//! Minimal reader for the first worksheet of an `.xlsx` workbook.
//!
//! An `.xlsx` file is a zip archive of XML parts. Only two are needed:
//! `xl/sharedStrings.xml` (the string table) and `xl/worksheets/sheet1.xml`.
//! Formatting, formulas and dates are not interpreted; cells come back as
//! their stored text.

use std::io::Read;
use std::path::Path;

use crate::IngestError;

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Zero-based index of column `XFD`, the last column a worksheet can hold.
const MAX_COLUMN: usize = 16_383;

/// Read the first worksheet as rows of cell text.
///
/// Cells are placed by their column reference, so gaps left by empty
/// cells read as empty strings.
pub(crate) fn read_first_sheet(path: &Path) -> Result<Vec<Vec<String>>, IngestError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(spreadsheet_error)?;

    let shared_strings = match archive.by_name(SHARED_STRINGS) {
        Ok(mut entry) => {
            let mut xml = String::new();
            entry.read_to_string(&mut xml)?;
            parse_shared_strings(&xml)
        }
        Err(zip::result::ZipError::FileNotFound) => Vec::new(),
        Err(e) => return Err(spreadsheet_error(e)),
    };

    let mut sheet_xml = String::new();
    archive
        .by_name(FIRST_SHEET)
        .map_err(spreadsheet_error)?
        .read_to_string(&mut sheet_xml)?;

    parse_sheet(&sheet_xml, &shared_strings)
}

fn spreadsheet_error(e: zip::result::ZipError) -> IngestError {
    IngestError::Spreadsheet(e.to_string())
}

/// Splits XML into `(tag, text_before_tag)` pairs. Tags are returned without
/// the angle brackets.
struct Tags<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Tags<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let open = self.rest.find('<')?;
        let text = &self.rest[..open];
        let after = &self.rest[open + 1..];
        let close = after.find('>')?;
        let tag = after[..close].trim();
        self.rest = &after[close + 1..];
        Some((tag, text))
    }
}

fn tags(xml: &str) -> Tags<'_> {
    Tags { rest: xml }
}

fn tag_name(tag: &str) -> &str {
    tag.split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(&tag[start..start + end])
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the shared string table. Rich-text runs inside one `<si>` are
/// joined into a single string.
fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    for (tag, text) in tags(xml) {
        if in_text {
            current.push_str(&unescape(text));
        }
        match tag_name(tag) {
            "si" if !tag.ends_with('/') => current.clear(),
            "si" => strings.push(String::new()),
            "t" => in_text = !tag.ends_with('/'),
            "" if tag == "/si" => strings.push(std::mem::take(&mut current)),
            "" if tag == "/t" => in_text = false,
            _ => {}
        }
    }

    strings
}

/// Zero-based column index from a cell reference such as `C7` or `AA12`.
///
/// Returns `None` when the reference has no column letters or names a
/// column past `XFD`.
fn column_index(reference: &str) -> Option<usize> {
    let index = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .try_fold(0usize, |acc, c| {
            let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
            acc.checked_mul(26)?
                .checked_add(digit)
                .filter(|&n| n <= MAX_COLUMN + 1)
        })?;
    index.checked_sub(1)
}

#[derive(Default)]
struct Cell {
    column: Option<usize>,
    kind: String,
    value: String,
}

fn parse_sheet(xml: &str, shared_strings: &[String]) -> Result<Vec<Vec<String>>, IngestError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut capture = false;

    for (tag, text) in tags(xml) {
        if capture {
            if let Some(c) = cell.as_mut() {
                c.value.push_str(&unescape(text));
            }
        }

        match tag_name(tag) {
            "row" if tag.ends_with('/') => rows.push(Vec::new()),
            "row" => row = Vec::new(),
            "c" => {
                let column = match attribute(tag, "r") {
                    Some(reference) => Some(column_index(reference).ok_or_else(|| {
                        IngestError::Spreadsheet(format!(
                            "cell reference '{}' is outside columns A..XFD",
                            reference
                        ))
                    })?),
                    None => None,
                };
                let current = Cell {
                    column,
                    kind: attribute(tag, "t").unwrap_or("").to_string(),
                    value: String::new(),
                };
                if tag.ends_with('/') {
                    place(&mut row, current, shared_strings);
                } else {
                    cell = Some(current);
                }
            }
            "v" | "t" if cell.is_some() => capture = !tag.ends_with('/'),
            "" => match tag {
                "/v" | "/t" => capture = false,
                "/c" => {
                    if let Some(c) = cell.take() {
                        place(&mut row, c, shared_strings);
                    }
                }
                "/row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            _ => {}
        }
    }

    Ok(rows)
}

fn place(row: &mut Vec<String>, cell: Cell, shared_strings: &[String]) {
    let value = match cell.kind.as_str() {
        "s" => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        "b" => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => cell.value,
    };

    let column = cell.column.unwrap_or(row.len());
    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
}
