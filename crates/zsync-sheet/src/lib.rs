//! Workbook bootstrap and data-sheet replacement for zsync.
//!
//! Only the data sheet is ever rewritten. Every other sheet is carried through
//! as read, and each write is committed through a temp file renamed over the
//! target so an interrupted run leaves the previous workbook in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use umya_spreadsheet::{Spreadsheet, Worksheet, XlsxError};
use uuid::Uuid;
use zsync_core::{
    NormalizedRow, RowAnnotation, ANNOTATION_COLUMNS, ANNOTATION_SHEET, COL_ABSTRACT,
    COL_AUTHORS, COL_KEY, COL_NOTES, COL_PUBLICATION, COL_TAGS, COL_THEME, COL_TITLE, COL_TYPE,
    COL_URL, COL_YEAR, DATA_COLUMNS, DATA_SHEET,
};

pub const CRATE_NAME: &str = "zsync-sheet";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("xlsx error for {path}: {source}")]
    Xlsx {
        path: String,
        #[source]
        source: XlsxError,
    },
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("workbook {path}: {message}")]
    Workbook { path: String, message: String },
}

impl SheetError {
    fn workbook(path: &Path, message: impl Into<String>) -> Self {
        SheetError::Workbook {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        SheetError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn xlsx(path: &Path, source: XlsxError) -> Self {
        SheetError::Xlsx {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Creates the workbook with an empty data sheet and an empty annotation sheet
/// when `path` does not exist yet. Returns whether a file was created.
pub fn ensure_workbook(path: &Path) -> Result<bool, SheetError> {
    if path.exists() {
        return Ok(false);
    }

    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    let data = book
        .new_sheet(DATA_SHEET)
        .map_err(|e| SheetError::workbook(path, e))?;
    write_header(data, &DATA_COLUMNS);
    let annotations = book
        .new_sheet(ANNOTATION_SHEET)
        .map_err(|e| SheetError::workbook(path, e))?;
    write_header(annotations, &ANNOTATION_COLUMNS);

    commit(&book, path)?;
    info!(path = %path.display(), "created new workbook");
    Ok(true)
}

/// Replaces the contents of the data sheet with `rows`, in order.
///
/// Theme/Notes cells are filled from `annotations` by key and left blank
/// otherwise. Returns the number of data rows written.
pub fn replace_data_sheet(
    path: &Path,
    rows: &[NormalizedRow],
    annotations: &HashMap<String, RowAnnotation>,
) -> Result<usize, SheetError> {
    let mut book = open(path)?;

    if book.get_sheet_by_name(DATA_SHEET).is_none() {
        debug!(path = %path.display(), "data sheet missing; recreating it");
        book.new_sheet(DATA_SHEET)
            .map_err(|e| SheetError::workbook(path, e))?;
    }
    let sheet = book
        .get_sheet_by_name_mut(DATA_SHEET)
        .ok_or_else(|| SheetError::workbook(path, format!("sheet {DATA_SHEET} not found")))?;

    clear_data_sheet(sheet);
    write_header(sheet, &DATA_COLUMNS);

    let blank = RowAnnotation::default();
    for (idx, row) in rows.iter().enumerate() {
        let annotation = annotations.get(&row.key).unwrap_or(&blank);
        write_data_row(sheet, idx as u32 + 2, row, annotation);
    }

    commit(&book, path)?;
    info!(path = %path.display(), rows = rows.len(), "replaced data sheet");
    Ok(rows.len())
}

pub fn read_sheet_values(path: &Path, sheet_name: &str) -> Result<Vec<Vec<String>>, SheetError> {
    let book = open(path)?;
    let sheet = book
        .get_sheet_by_name(sheet_name)
        .ok_or_else(|| SheetError::workbook(path, format!("sheet {sheet_name} not found")))?;
    Ok(sheet_values(sheet))
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>, SheetError> {
    let book = open(path)?;
    Ok(book
        .get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_string())
        .collect())
}

/// Theme/Notes values currently typed into the data sheet, keyed by Zotero key.
///
/// Rows with a blank key or with both annotation cells blank are skipped; the
/// first row wins when a key repeats. A workbook without a data sheet yields
/// an empty map.
pub fn read_data_annotations(path: &Path) -> Result<HashMap<String, RowAnnotation>, SheetError> {
    let book = open(path)?;
    let Some(sheet) = book.get_sheet_by_name(DATA_SHEET) else {
        return Ok(HashMap::new());
    };
    let values = sheet_values(sheet);
    let Some((header, body)) = values.split_first() else {
        return Ok(HashMap::new());
    };
    let columns = HeaderIndex::new(header);
    let (Some(key_col), Some(theme_col), Some(notes_col)) = (
        columns.get(COL_KEY),
        columns.get(COL_THEME),
        columns.get(COL_NOTES),
    ) else {
        return Ok(HashMap::new());
    };

    let mut out = HashMap::new();
    for row in body {
        let key = cell(row, key_col).trim();
        if key.is_empty() {
            continue;
        }
        let annotation = RowAnnotation {
            theme: cell(row, theme_col).to_string(),
            notes: cell(row, notes_col).to_string(),
        };
        if annotation.is_blank() {
            continue;
        }
        out.entry(key.to_string()).or_insert(annotation);
    }
    Ok(out)
}

pub fn read_data_rows(path: &Path) -> Result<Vec<NormalizedRow>, SheetError> {
    let values = read_sheet_values(path, DATA_SHEET)?;
    let Some((header, body)) = values.split_first() else {
        return Ok(Vec::new());
    };
    let columns = HeaderIndex::new(header);
    let text = |row: &[String], name: &str| {
        columns
            .get(name)
            .map(|idx| cell(row, idx).to_string())
            .unwrap_or_default()
    };

    Ok(body
        .iter()
        .map(Vec::as_slice)
        .filter(|&row| !text(row, COL_KEY).trim().is_empty())
        .map(|row| NormalizedRow {
            key: text(row, COL_KEY),
            authors: text(row, COL_AUTHORS),
            year: text(row, COL_YEAR).trim().parse().ok(),
            title: text(row, COL_TITLE),
            item_type: text(row, COL_TYPE),
            abstract_note: text(row, COL_ABSTRACT),
            publication: text(row, COL_PUBLICATION),
            tags: text(row, COL_TAGS),
            url: text(row, COL_URL),
        })
        .collect())
}

struct HeaderIndex<'a> {
    names: &'a [String],
}

impl<'a> HeaderIndex<'a> {
    fn new(names: &'a [String]) -> Self {
        Self { names }
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|h| h.trim() == name)
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn open(path: &Path) -> Result<Spreadsheet, SheetError> {
    umya_spreadsheet::reader::xlsx::read(path).map_err(|e| SheetError::xlsx(path, e))
}

fn sheet_values(sheet: &Worksheet) -> Vec<Vec<String>> {
    let cols = sheet.get_highest_column();
    let rows = sheet.get_highest_row();
    let mut values: Vec<Vec<String>> = (1..=rows)
        .map(|row| (1..=cols).map(|col| sheet.get_value((col, row))).collect())
        .collect();
    while values
        .last()
        .is_some_and(|row| row.iter().all(|v| v.is_empty()))
    {
        values.pop();
    }
    values
}

/// Drops every row below the header and any column past the data columns.
/// The header row itself is kept so its formatting survives.
fn clear_data_sheet(sheet: &mut Worksheet) {
    let rows = sheet.get_highest_row();
    if rows > 1 {
        sheet.remove_row(&2, &(rows - 1));
    }
    let width = DATA_COLUMNS.len() as u32;
    let cols = sheet.get_highest_column();
    if cols > width {
        sheet.remove_column_by_index(&(width + 1), &(cols - width));
    }
}

fn write_header(sheet: &mut Worksheet, columns: &[&str]) {
    for (idx, name) in columns.iter().enumerate() {
        sheet
            .get_cell_mut((idx as u32 + 1, 1))
            .set_value_string(*name);
    }
}

fn write_data_row(sheet: &mut Worksheet, row_no: u32, row: &NormalizedRow, annotation: &RowAnnotation) {
    for (idx, name) in DATA_COLUMNS.iter().enumerate() {
        let cell = sheet.get_cell_mut((idx as u32 + 1, row_no));
        let text = match *name {
            COL_YEAR => {
                match row.year {
                    Some(year) => {
                        cell.set_value_number(year);
                    }
                    None => {
                        cell.set_value_string("");
                    }
                }
                continue;
            }
            COL_KEY => row.key.as_str(),
            COL_AUTHORS => row.authors.as_str(),
            COL_TITLE => row.title.as_str(),
            COL_TYPE => row.item_type.as_str(),
            COL_THEME => annotation.theme.as_str(),
            COL_ABSTRACT => row.abstract_note.as_str(),
            COL_PUBLICATION => row.publication.as_str(),
            COL_TAGS => row.tags.as_str(),
            COL_URL => row.url.as_str(),
            COL_NOTES => annotation.notes.as_str(),
            _ => "",
        };
        cell.set_value_string(text);
    }
}

fn commit(book: &Spreadsheet, path: &Path) -> Result<(), SheetError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| SheetError::io(&parent, e))?;

    let temp_path = parent.join(format!(".{}.zsync.tmp.xlsx", Uuid::new_v4()));
    if let Err(err) = umya_spreadsheet::writer::xlsx::write(book, &temp_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(SheetError::xlsx(&temp_path, err));
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            Err(SheetError::io(path, err))
        }
    }
}
