use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Share of resources guarded by at least one check.
pub fn protection_coverage(protected: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let coverage = protected as f64 / total as f64 * 100.0;
    coverage
}

pub fn color_coded_coverage_cell(protected: usize, total: usize) -> Cell {
    let coverage = protection_coverage(protected, total);
    let text = format!("{protected} ({coverage:.1}%)");
    if coverage > 80.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if coverage >= 50.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn color_coded_exposure_cell(cross_project: usize) -> Cell {
    if cross_project == 0 {
        Cell::new(cross_project).fg(TableColor::Green)
    } else {
        Cell::new(cross_project).fg(TableColor::Red)
    }
}

pub fn protection_cell(protected: bool) -> Cell {
    if protected {
        Cell::new("protected").fg(TableColor::Green)
    } else {
        Cell::new("unprotected").fg(TableColor::Red)
    }
}
