//! Text table of delivery owners for diagnostics.

use crate::model::DeliveryOwner;

const HEADERS: [&str; 6] = ["#", "created", "name", "pid", "channel_name", "sub_key"];

/// Render owner records, newest first.
///
/// `sub_pattern` yields the pattern a sub_key subscribed with; records
/// without a subscription show `default_pattern`. Websocket connection
/// details are folded into the last column.
pub fn format_owner_table<'a>(
    owners: impl IntoIterator<Item = &'a DeliveryOwner>,
    columns: &[usize; 6],
    sub_pattern: impl Fn(&str) -> Option<String>,
    default_pattern: &str,
) -> String {
    let mut owners: Vec<&DeliveryOwner> = owners.into_iter().collect();
    owners.sort_by(|a, b| {
        b.creation_time
            .cmp(&a.creation_time)
            .then_with(|| b.channel_name.cmp(&a.channel_name))
            .then_with(|| b.sub_key.cmp(&a.sub_key))
    });

    let mut rows: Vec<[String; 6]> = vec![HEADERS.map(str::to_string)];

    for (idx, owner) in owners.iter().enumerate() {
        let pattern = sub_pattern(&owner.sub_key).unwrap_or_else(|| default_pattern.to_string());
        let mut sub_key_info = vec![format!("{} -> {}", owner.sub_key, pattern)];
        if let Some(wsx_info) = &owner.wsx_info {
            for (name, value) in wsx_info.fields() {
                sub_key_info.push(format!("{name}: {value}"));
            }
        }

        rows.push([
            (idx + 1).to_string(),
            owner.creation_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            owner.server_name.clone(),
            owner.server_pid.to_string(),
            owner.channel_name.clone().unwrap_or_else(|| "---".to_string()),
            sub_key_info.join("\n"),
        ]);
    }

    draw(&rows, columns)
}

fn draw(rows: &[[String; 6]], columns: &[usize; 6]) -> String {
    let border: String = columns
        .iter()
        .map(|width| "-".repeat(width + 2))
        .collect::<Vec<_>>()
        .join("+");
    let border = format!("+{border}+\n");

    let mut out = border.clone();
    for row in rows {
        let cells: Vec<Vec<String>> = row
            .iter()
            .zip(columns)
            .map(|(cell, width)| wrap(cell, *width))
            .collect();
        let height = cells.iter().map(Vec::len).max().unwrap_or(1);

        for line in 0..height {
            out.push('|');
            for (cell, width) in cells.iter().zip(columns) {
                let text = cell.get(line).map(String::as_str).unwrap_or("");
                out.push_str(&format!(" {text:<width$} |", width = *width));
            }
            out.push('\n');
        }
        out.push_str(&border);
    }
    out
}

/// Split a cell into lines no wider than `width` characters.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let chars: Vec<char> = raw.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}
