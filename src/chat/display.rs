use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use colored::*;

use weai::llm::{Message, ModelHandle, Role};

fn header(title: &str) -> Cell {
    Cell::new(title).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

/// Displays the conversation as a table.
pub fn display_history(history: &[Message]) {
    if history.is_empty() {
        println!("{}", "No messages yet".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .set_header(vec![header("#"), header("Role"), header("Time"), header("Text")])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (i, message) in history.iter().enumerate() {
        let role_color = match message.role {
            Role::System => Color::Magenta,
            Role::User => Color::Green,
            Role::Assistant => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(i + 1).set_alignment(CellAlignment::Right),
            Cell::new(message.role.label()).fg(role_color),
            Cell::new(message.created_at.format("%H:%M:%S")).fg(Color::DarkGrey),
            Cell::new(&message.text),
        ]);
    }

    println!("\n{}", table);
    println!("{}", format!("Total messages: {}", history.len()).bright_green());
}

pub fn display_model_summary(model: &ModelHandle) {
    let summary = model.summary();
    let unknown = || "unknown".to_string();

    let mut table = Table::new();
    table
        .set_header(vec![header("Property"), header("Value")])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let rows = [
        ("Name", summary.name.clone()),
        ("Path", model.path().display().to_string()),
        ("Architecture", summary.architecture.clone().unwrap_or_else(unknown)),
        ("Trained context", summary.context_length.map(|n| n.to_string()).unwrap_or_else(unknown)),
        ("Context size", model.context_size().to_string()),
        ("Blocks", summary.block_count.map(|n| n.to_string()).unwrap_or_else(unknown)),
        ("Accelerator layers", model.gpu_layers().to_string()),
        ("GGUF version", summary.version.to_string()),
        ("Loaded at", model.loaded_at().format("%Y-%m-%d %H:%M:%S").to_string()),
    ];
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key).fg(Color::Green), Cell::new(value)]);
    }

    println!("\n{}", table);
}
