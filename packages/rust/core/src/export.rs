//! Tabular export of collected product records.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Local, NaiveDate};
use marketcrawl_shared::{MarketCrawlError, Result, Row};
use rust_xlsxwriter::{Format, Workbook};
use tracing::info;

/// Destination for a run's rows.
pub trait Exporter: Send + Sync {
    /// Write `rows` to `path`, one row per record under a header of every
    /// column seen in any row.
    fn write(&self, rows: &[Row], path: &Path) -> Result<()>;
}

/// Every column name across `rows`, in first-seen order.
pub fn column_union(rows: &[Row]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !columns.contains(&key.as_str()) {
                columns.push(key.as_str());
            }
        }
    }
    columns
}

// ---------------------------------------------------------------------------
// XLSX
// ---------------------------------------------------------------------------

/// Longest string a single worksheet cell accepts.
const MAX_CELL_CHARS: usize = 32_767;

/// Writes a single-sheet `.xlsx` workbook. Values longer than a cell
/// accepts are cut to fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxExporter;

impl Exporter for XlsxExporter {
    fn write(&self, rows: &[Row], path: &Path) -> Result<()> {
        let columns = column_union(rows);
        let index: HashMap<&str, u16> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| Ok((*c, column_number(i)?)))
            .collect::<Result<_>>()?;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let header = Format::new().set_bold();

        for name in &columns {
            sheet
                .write_string_with_format(0, index[name], *name, &header)
                .map_err(MarketCrawlError::export)?;
        }

        for (i, row) in rows.iter().enumerate() {
            let line = u32::try_from(i + 1)
                .map_err(|_| MarketCrawlError::export("too many rows for one sheet"))?;
            for (key, value) in row {
                let Some(value) = value else { continue };
                sheet
                    .write_string(line, index[key.as_str()], fit_cell(value))
                    .map_err(MarketCrawlError::export)?;
            }
        }

        workbook.save(path).map_err(MarketCrawlError::export)?;
        info!(path = %path.display(), rows = rows.len(), columns = columns.len(), "workbook written");
        Ok(())
    }
}

/// `value` cut to at most `MAX_CELL_CHARS` characters, on a char boundary.
fn fit_cell(value: &str) -> &str {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

fn column_number(i: usize) -> Result<u16> {
    u16::try_from(i).map_err(|_| MarketCrawlError::export("too many columns for one sheet"))
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// `"{base} {DD.MM.YY} - {count}.xlsx"` for today's local date.
pub fn filename_ru(base: &str, count: usize) -> String {
    filename_for_date(base, count, Local::now().date_naive())
}

/// Export file name for a given date, with `.` grouping thousands of `count`.
pub fn filename_for_date(base: &str, count: usize, date: NaiveDate) -> String {
    format!(
        "{base} {} - {}.xlsx",
        date.format("%d.%m.%y"),
        group_thousands(count)
    )
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn union_keeps_first_seen_order() {
        let rows = vec![
            row(&[("title", Some("A")), ("spec_размер", Some("17")), ("link", Some("x"))]),
            row(&[("title", Some("B")), ("spec_длина", None), ("link", Some("y"))]),
        ];
        assert_eq!(
            column_union(&rows),
            vec!["title", "spec_размер", "link", "spec_длина"]
        );
        assert!(column_union(&[]).is_empty());
    }

    #[test]
    fn thousands_are_dot_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_234), "1.234");
        assert_eq!(group_thousands(1_234_567), "1.234.567");
    }

    #[test]
    fn filename_for_known_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            filename_for_date("Catalog", 1234, date),
            "Catalog 18.10.26 - 1.234.xlsx"
        );
    }

    #[test]
    fn filename_uses_today() {
        let today = Local::now().date_naive().format("%d.%m.%y").to_string();
        assert_eq!(filename_ru("Catalog", 1234), format!("Catalog {today} - 1.234.xlsx"));
    }

    #[test]
    fn writes_workbook() {
        let dir = std::env::temp_dir().join(format!("mc-export-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.xlsx");

        let rows = vec![
            row(&[("title", Some("Кольцо")), ("price", Some("125 000 ₸"))]),
            row(&[("title", None), ("spec_проба", Some("585"))]),
        ];
        XlsxExporter.write(&rows, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"), "xlsx is a zip container");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn long_values_are_cut_to_cell_limit() {
        let long = "а".repeat(40_000);
        let cut = fit_cell(&long);
        assert_eq!(cut.chars().count(), MAX_CELL_CHARS);
        assert!(long.starts_with(cut));
        assert_eq!(fit_cell("Кольцо"), "Кольцо");
    }

    #[test]
    fn oversized_value_still_exports() {
        let dir = std::env::temp_dir().join(format!("mc-export-long-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.xlsx");

        let description = "а".repeat(40_000);
        let rows = vec![row(&[("title", Some("Кольцо")), ("description", Some(description.as_str()))])];
        XlsxExporter.write(&rows, &path).unwrap();
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_path_is_export_error() {
        let path = std::env::temp_dir()
            .join(format!("mc-missing-{}", uuid::Uuid::now_v7()))
            .join("nested")
            .join("out.xlsx");
        let err = XlsxExporter.write(&[], &path).unwrap_err();
        assert!(matches!(err, MarketCrawlError::Export(_)));
    }
}
