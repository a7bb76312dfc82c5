use std::io::{self, Write};

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use datatap_cli::{Inventory, RunSummary, TapEntry};
use datatap_model::Domain;

pub fn print_taps(out: &mut impl Write, entries: &[TapEntry]) -> io::Result<()> {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Tap"),
        header_cell("Consumes"),
        header_cell("Source"),
        header_cell("Sink"),
        header_cell("Options"),
        header_cell("Description"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Center);
    align_column(&mut table, 3, CellAlignment::Center);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.ident).add_attribute(Attribute::Bold),
            Cell::new(domains_label(entry.consumes)),
            flag_cell(entry.standalone),
            flag_cell(entry.writable),
            options_cell(entry.keywords),
            Cell::new(entry.summary),
        ]);
    }
    writeln!(out, "{table}")
}

pub fn print_inventory(out: &mut impl Write, inventory: &Inventory) -> io::Result<()> {
    writeln!(out, "Archive: {}", inventory.path.display())?;
    writeln!(out, "Format: {}", inventory.format)?;
    writeln!(
        out,
        "Originator: {}",
        inventory.originator.as_deref().unwrap_or("-")
    )?;
    let mut table = Table::new();
    table.set_header(vec![header_cell("Member"), header_cell("Bytes")]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    let mut total = 0u64;
    for member in &inventory.members {
        total += member.size;
        table.add_row(vec![Cell::new(&member.name), Cell::new(member.size)]);
    }
    table.add_row(vec![
        Cell::new(format!("TOTAL ({} members)", inventory.members.len()))
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(total).add_attribute(Attribute::Bold),
    ]);
    writeln!(out, "{table}")
}

/// One line on stderr so that stdout only carries pipeline output.
pub fn print_run_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    let report = &summary.report;
    write!(out, "{}: ", summary.chain.join(" -- "))?;
    if report.committed > 0 || report.processed > 0 {
        write!(
            out,
            "{} records processed, {} committed",
            report.processed, report.committed
        )?;
    } else {
        write!(out, "{} bytes written", report.bytes)?;
    }
    if summary.appended > 0 {
        let appended = &summary.chain[summary.chain.len() - summary.appended..];
        write!(out, " (destination: {})", appended.join(" -- "))?;
    }
    writeln!(out)
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn flag_cell(enabled: bool) -> Cell {
    if enabled {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("-").fg(Color::DarkGrey)
    }
}

fn options_cell(keywords: &[&str]) -> Cell {
    if keywords.is_empty() {
        return Cell::new("-").fg(Color::DarkGrey);
    }
    let options: Vec<_> = keywords.iter().map(|keyword| format!("--{keyword}")).collect();
    Cell::new(options.join(" "))
}

fn domains_label(domains: &[Domain]) -> String {
    let labels: Vec<_> = domains.iter().map(Domain::as_str).collect();
    labels.join(", ")
}
