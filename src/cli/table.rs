//! Table builder wrapper around comfy-table for consistent list display.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// Borderless table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table under a count line, or a "none found" line when empty.
pub fn render_list(singular: &str, plural: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {plural} found.");
    }
    let noun = if total == 1 { singular } else { plural };
    format!("{total} {noun}:\n{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_list() {
        let mut table = list_table(&["name", "rate"]);
        table.add_row(vec!["switch-mode", "100%"]);
        let rendered = render_list("strategy", "strategies", &table, 1);
        assert!(rendered.starts_with("1 strategy:"));
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("switch-mode"));
        assert_eq!(
            render_list("strategy", "strategies", &table, 0),
            "No strategies found."
        );
    }
}
