//! Output formatting for meshctl

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// `key: value` lines
    Plain,
}

/// Items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table<T: TableDisplay>(items: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(T::headers());
    for item in items {
        table.add_row(item.row());
    }
    table
}

fn plain<T: TableDisplay>(item: &T) -> String {
    T::headers()
        .iter()
        .zip(item.row())
        .map(|(h, v)| format!("{}: {}", h, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a list in the requested format
pub fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Table if items.is_empty() => "No items found.".to_string(),
        OutputFormat::Table => table(items).to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(items)?,
        OutputFormat::Yaml => serde_yaml::to_string(items)?,
        OutputFormat::Plain => items.iter().map(plain).collect::<Vec<_>>().join("\n---\n"),
    })
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) -> anyhow::Result<()> {
    let out = match format {
        OutputFormat::Json => serde_json::to_string_pretty(item)?,
        OutputFormat::Yaml => serde_yaml::to_string(item)?,
        OutputFormat::Plain => plain(item),
        OutputFormat::Table => table(std::slice::from_ref(item)).to_string(),
    };
    println!("{}", out);
    Ok(())
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render_list(items, format)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

/// Unix timestamp as UTC time, `-` when unset
pub fn timestamp(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
        port: u16,
    }

    impl TableDisplay for Row {
        fn headers() -> Vec<&'static str> {
            vec!["Name", "Port"]
        }
        fn row(&self) -> Vec<String> {
            vec![self.name.clone(), self.port.to_string()]
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { name: "wg0".into(), port: 20000 },
            Row { name: "wg1".into(), port: 20001 },
        ]
    }

    #[test]
    fn test_plain_and_yaml() {
        let plain = render_list(&rows(), OutputFormat::Plain).unwrap();
        assert_eq!(plain, "Name: wg0\nPort: 20000\n---\nName: wg1\nPort: 20001");

        let yaml = render_list(&rows(), OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("- name: wg0\n  port: 20000"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(
            render_list::<Row>(&[], OutputFormat::Table).unwrap(),
            "No items found."
        );
        assert_eq!(render_list::<Row>(&[], OutputFormat::Json).unwrap(), "[]");
    }

    #[test]
    fn test_timestamp() {
        assert_eq!(timestamp(None), "-");
        assert_eq!(timestamp(Some(0)), "1970-01-01 00:00:00");
    }
}
