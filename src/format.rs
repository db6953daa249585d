//! Output formatting for the command line.
//!
//! Results are rendered as an ASCII table (like the MySQL CLI), a markdown
//! table or JSON.

use crate::models::{QueryInfo, Row, TableSchema};
use crate::storage::MigrationReport;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// ASCII table format (like MySQL CLI)
    #[default]
    Table,
    /// Markdown table format
    Markdown,
    Json,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Column names of a result: the first row's keys, in order.
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

pub fn format_as_table(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() {
        return "Empty set\n".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    output.extend(
        columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| format!("| {} ", pad(col, *w, Align::Center))),
    );
    output.push_str("|\n");
    output.push_str(&separator);

    for row in rows {
        for (col, w) in columns.iter().zip(&widths) {
            let value = row.get(col).unwrap_or(&JsonValue::Null);
            let align = if matches!(value, JsonValue::Number(_)) {
                Align::Right
            } else {
                Align::Left
            };
            output.push_str(&format!("| {} ", pad(&format_value(value), *w, align)));
        }
        output.push_str("|\n");
    }
    output.push_str(&separator);
    output
}

pub fn format_as_markdown(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() {
        return "*Empty set*\n".to_string();
    }

    let mut output: String = columns.iter().map(|c| format!("| {} ", c)).collect();
    output.push_str("|\n");
    output.push_str(&columns.iter().map(|_| "|---").collect::<String>());
    output.push_str("|\n");

    for row in rows {
        for col in columns {
            let value = row.get(col).unwrap_or(&JsonValue::Null);
            output.push_str(&format!("| {} ", format_value(value).replace('|', "\\|")));
        }
        output.push_str("|\n");
    }
    output
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

/// Pad to a display width; `format!` width counts chars, not columns.
fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = width.saturating_sub(text.width());
    match align {
        Align::Left => format!("{}{}", text, " ".repeat(fill)),
        Align::Right => format!("{}{}", " ".repeat(fill), text),
        Align::Center => {
            let left = fill / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(fill - left))
        }
    }
}

fn render(format: OutputFormat, columns: &[String], rows: &[Row]) -> String {
    match format {
        OutputFormat::Table => format_as_table(columns, rows),
        OutputFormat::Markdown => format_as_markdown(columns, rows),
        OutputFormat::Json => json_text(&JsonValue::Array(
            rows.iter().cloned().map(JsonValue::Object).collect(),
        )),
    }
}

fn json_text(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default() + "\n"
}

fn row(value: JsonValue) -> Row {
    match value {
        JsonValue::Object(map) => map,
        _ => Row::new(),
    }
}

/// Rows of a reader, with the footer line for text formats.
pub fn render_rows(
    format: OutputFormat,
    rows: &[Row],
    total: Option<u64>,
    elapsed_ms: u64,
) -> String {
    if format == OutputFormat::Json {
        return json_text(&json!({ "rows": rows, "total": total, "elapsed_ms": elapsed_ms }));
    }
    let mut output = render(format, &columns_of(rows), rows);
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&match total {
        Some(total) => format!(
            "{} {} of {} in set ({:.2} sec)\n",
            rows.len(),
            noun,
            total,
            elapsed_ms as f64 / 1000.0
        ),
        None => format!(
            "{} {} in set ({:.2} sec)\n",
            rows.len(),
            noun,
            elapsed_ms as f64 / 1000.0
        ),
    });
    output
}

/// Outcome of a mutation or a failed query.
pub fn render_info(format: OutputFormat, info: &QueryInfo) -> String {
    if format == OutputFormat::Json {
        return json_text(&serde_json::to_value(info).unwrap_or_default());
    }
    let mut rows = vec![
        row(json!({"key": "type", "value": info.statement_type.to_string()})),
        row(json!({"key": "affected", "value": info.affected})),
        row(json!({"key": "insertid", "value": info.insert_id})),
        row(json!({"key": "query", "value": info.query})),
    ];
    if let Some(error) = &info.error {
        rows.push(row(json!({"key": "error", "value": error})));
    }
    if !info.returned.is_empty() {
        rows.push(row(json!({"key": "returned", "value": info.returned})));
    }
    render(format, &["key".to_string(), "value".to_string()], &rows)
}

/// Live columns and indexes of a table.
pub fn render_schema(format: OutputFormat, schema: &TableSchema) -> String {
    if format == OutputFormat::Json {
        return json_text(&serde_json::to_value(schema).unwrap_or_default());
    }
    let columns: Vec<Row> = schema
        .columns
        .iter()
        .map(|c| {
            row(json!({
                "column": c.name,
                "type": c.data_type,
                "nullable": c.nullable,
                "default": c.default_value,
                "key": if c.is_primary_key { "PRI" } else { "" },
                "extra": c.extra.clone().unwrap_or_default(),
            }))
        })
        .collect();
    let indexes: Vec<Row> = schema
        .indexes
        .iter()
        .map(|i| {
            row(json!({
                "index": i.name,
                "columns": i.columns.join(", "),
                "unique": i.is_unique,
                "algorithm": i.index_algorithm.clone().unwrap_or_default(),
            }))
        })
        .collect();

    let mut output = render(format, &columns_of(&columns), &columns);
    if !indexes.is_empty() {
        output.push('\n');
        output.push_str(&render(format, &columns_of(&indexes), &indexes));
    }
    output
}

/// One line per migration step, with its statements.
pub fn render_reports(format: OutputFormat, reports: &[MigrationReport]) -> String {
    if format == OutputFormat::Json {
        return json_text(&serde_json::to_value(reports).unwrap_or_default());
    }
    let rows: Vec<Row> = reports
        .iter()
        .flat_map(|report| {
            report.steps.iter().map(move |step| {
                let sql: Vec<&str> = step
                    .statements
                    .iter()
                    .chain(&step.cleanup)
                    .map(String::as_str)
                    .collect();
                row(json!({
                    "storage": report.storage,
                    "step": step.kind.to_string(),
                    "target": step.target,
                    "status": step.status.to_string(),
                    "sql": sql.join("; "),
                }))
            })
        })
        .collect();
    if rows.is_empty() {
        return "All storages are up to date\n".to_string();
    }
    render(format, &columns_of(&rows), &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatementType;

    fn rows() -> Vec<Row> {
        vec![
            row(json!({"id": 1, "name": "Ünïcode"})),
            row(json!({"id": 22, "name": null})),
        ]
    }

    #[test]
    fn test_table_aligns_by_display_width() {
        let text = format_as_table(&columns_of(&rows()), &rows());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "+----+---------+");
        assert_eq!(lines[1], "| id |  name   |");
        assert_eq!(lines[3], "|  1 | Ünïcode |");
        assert_eq!(lines[4], "| 22 | NULL    |");
        assert_eq!(format_as_table(&[], &[]), "Empty set\n");
    }

    #[test]
    fn test_markdown() {
        let text = format_as_markdown(&columns_of(&rows()), &rows());
        assert!(text.starts_with("| id | name |\n|---|---|\n| 1 | Ünïcode |"));
    }

    #[test]
    fn test_render_rows_footer() {
        let text = render_rows(OutputFormat::Table, &rows(), Some(40), 1500);
        assert!(text.ends_with("2 rows of 40 in set (1.50 sec)\n"));

        let json: JsonValue =
            serde_json::from_str(&render_rows(OutputFormat::Json, &rows(), None, 3)).unwrap();
        assert_eq!(json["rows"][0]["id"], json!(1));
        assert_eq!(json["total"], JsonValue::Null);
    }

    #[test]
    fn test_render_failed_info() {
        let info = QueryInfo::failed(StatementType::Insert, "INSERT INTO x", "no such table: x");
        let text = render_info(OutputFormat::Markdown, &info);
        assert!(text.contains("| error | no such table: x |"));
        assert!(text.contains("| affected | 0 |"));
    }
}
