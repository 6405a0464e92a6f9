use crate::query::TableQuery;
use crate::row::TableRow;
use crate::value::Value;
use crate::Table;

/// Supported dump/print output formats (spec §4.G.3 "Dump/print").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Ascii,
    Csv,
    Tsv,
    Json,
    Markdown,
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub page_size: usize,
    pub max_column_width: usize,
    pub show_row_numbers: bool,
    pub null_representation: String,
    /// `None` means every schema column, in declaration order.
    pub columns: Option<Vec<String>>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_column_width: 32,
            show_row_numbers: false,
            null_representation: "NULL".to_string(),
            columns: None,
        }
    }
}

fn value_display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::DateTime(ms) => ms.to_string(),
        Value::Binary(bytes) => format!("0x{}", hex::encode(bytes)),
        Value::Json(text) => text.clone(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if max == 0 || s.chars().count() <= max {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max.saturating_sub(1)).collect();
    truncated.push('\u{2026}');
    truncated
}

fn cell_text(row: &TableRow, column: &str, options: &DumpOptions) -> String {
    match row.values.get(column) {
        None | Some(Value::Null) => options.null_representation.clone(),
        Some(v) => truncate(&value_display(v), options.max_column_width),
    }
}

fn csv_escape(field: &str, separator: char) -> String {
    if field.contains(separator) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Caches a filtered-and-ordered row snapshot and exposes page
/// navigation over it (spec §4.G.3 "a pager abstraction").
pub struct Pager {
    rows: Vec<TableRow>,
    columns: Vec<String>,
    options: DumpOptions,
}

impl Pager {
    pub fn new(table: &Table, query: Option<&TableQuery>, options: DumpOptions) -> Self {
        let rows = match query {
            Some(q) => table.query(q),
            None => table.all_rows(),
        };
        let columns = options
            .columns
            .clone()
            .unwrap_or_else(|| table.schema().columns.iter().map(|c| c.name.clone()).collect());
        Self { rows, columns, options }
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn page_count(&self) -> usize {
        if self.options.page_size == 0 || self.rows.is_empty() {
            return 1;
        }
        self.rows.len().div_ceil(self.options.page_size)
    }

    pub fn page(&self, n: usize) -> &[TableRow] {
        if self.options.page_size == 0 {
            return &self.rows;
        }
        let start = n.saturating_mul(self.options.page_size).min(self.rows.len());
        let end = (start + self.options.page_size).min(self.rows.len());
        &self.rows[start..end]
    }

    pub fn render(&self, format: DumpFormat) -> String {
        render_rows(&self.rows, &self.columns, &self.options, format)
    }

    pub fn render_page(&self, n: usize, format: DumpFormat) -> String {
        let page: Vec<TableRow> = self.page(n).to_vec();
        render_rows(&page, &self.columns, &self.options, format)
    }
}

fn header_labels(columns: &[String], options: &DumpOptions) -> Vec<String> {
    let mut labels = Vec::with_capacity(columns.len() + 1);
    if options.show_row_numbers {
        labels.push("#".to_string());
    }
    labels.extend(columns.iter().cloned());
    labels
}

fn row_cells(row: &TableRow, index: usize, columns: &[String], options: &DumpOptions) -> Vec<String> {
    let mut cells = Vec::with_capacity(columns.len() + 1);
    if options.show_row_numbers {
        cells.push((index + 1).to_string());
    }
    cells.extend(columns.iter().map(|c| cell_text(row, c, options)));
    cells
}

fn render_rows(rows: &[TableRow], columns: &[String], options: &DumpOptions, format: DumpFormat) -> String {
    match format {
        DumpFormat::Json => {
            let array: Vec<serde_json::Value> = rows
                .iter()
                .map(|row| {
                    let mut map = serde_json::Map::new();
                    for column in columns {
                        let value = row.values.get(column).cloned().unwrap_or(Value::Null);
                        map.insert(column.clone(), value.to_json());
                    }
                    serde_json::Value::Object(map)
                })
                .collect();
            serde_json::to_string_pretty(&array).unwrap_or_default()
        }
        DumpFormat::Csv | DumpFormat::Tsv => {
            let separator = if format == DumpFormat::Csv { ',' } else { '\t' };
            let mut out = String::new();
            let header = header_labels(columns, options);
            out.push_str(&header.iter().map(|h| csv_escape(h, separator)).collect::<Vec<_>>().join(&separator.to_string()));
            out.push('\n');
            for (i, row) in rows.iter().enumerate() {
                let cells = row_cells(row, i, columns, options);
                out.push_str(&cells.iter().map(|c| csv_escape(c, separator)).collect::<Vec<_>>().join(&separator.to_string()));
                out.push('\n');
            }
            out
        }
        DumpFormat::Markdown => {
            let header = header_labels(columns, options);
            let mut out = String::new();
            out.push_str("| ");
            out.push_str(&header.join(" | "));
            out.push_str(" |\n");
            out.push_str("|");
            out.push_str(&"---|".repeat(header.len()));
            out.push('\n');
            for (i, row) in rows.iter().enumerate() {
                let cells = row_cells(row, i, columns, options);
                out.push_str("| ");
                out.push_str(&cells.join(" | "));
                out.push_str(" |\n");
            }
            out
        }
        DumpFormat::Ascii => {
            let header = header_labels(columns, options);
            let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
            let rendered: Vec<Vec<String>> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| row_cells(row, i, columns, options))
                .collect();
            for row in &rendered {
                for (i, cell) in row.iter().enumerate() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
            let border = |widths: &[usize]| -> String {
                let mut line = String::from("+");
                for w in widths {
                    line.push_str(&"-".repeat(w + 2));
                    line.push('+');
                }
                line
            };
            let format_row = |cells: &[String], widths: &[usize]| -> String {
                let mut line = String::from("|");
                for (cell, w) in cells.iter().zip(widths) {
                    line.push(' ');
                    line.push_str(cell);
                    line.push_str(&" ".repeat(w.saturating_sub(cell.chars().count())));
                    line.push_str(" |");
                }
                line
            };
            let mut out = String::new();
            out.push_str(&border(&widths));
            out.push('\n');
            out.push_str(&format_row(&header, &widths));
            out.push('\n');
            out.push_str(&border(&widths));
            out.push('\n');
            for row in &rendered {
                out.push_str(&format_row(row, &widths));
                out.push('\n');
            }
            out.push_str(&border(&widths));
            out.push('\n');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDefinition, ColumnType, TableSchema};
    use std::collections::HashMap;

    fn sample_table() -> std::sync::Arc<Table> {
        let mut schema = TableSchema::new("t");
        schema.add_column(ColumnDefinition::new("name", ColumnType::String, false)).unwrap();
        let table = Table::new(schema);
        for name in ["Alpha", "Beta"] {
            let mut values = HashMap::new();
            values.insert("name".to_string(), Value::String(name.to_string()));
            table.insert(values).unwrap();
        }
        table
    }

    #[test]
    fn ascii_render_has_borders_and_rows() {
        let table = sample_table();
        let pager = Pager::new(&table, None, DumpOptions::default());
        let rendered = pager.render(DumpFormat::Ascii);
        assert!(rendered.starts_with('+'));
        assert!(rendered.contains("Alpha"));
        assert!(rendered.contains("Beta"));
    }

    #[test]
    fn csv_render_has_header_and_two_rows() {
        let table = sample_table();
        let pager = Pager::new(&table, None, DumpOptions::default());
        let rendered = pager.render(DumpFormat::Csv);
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn pagination_respects_page_size() {
        let table = sample_table();
        let options = DumpOptions { page_size: 1, ..Default::default() };
        let pager = Pager::new(&table, None, options);
        assert_eq!(pager.total_rows(), 2);
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.page(0).len(), 1);
        assert_eq!(pager.page(1).len(), 1);
    }
}
