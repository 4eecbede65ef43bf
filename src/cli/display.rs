use crate::network::ClientError;
use std::net::SocketAddr;

/// One line of the node table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub which: usize,
    pub address: SocketAddr,
    pub queued: usize,
    pub reconnect_attempts: u32,
    pub outcome: String,
}

/// Short text for a query result: the version, or why there is none.
pub fn format_outcome(result: &Result<String, ClientError>) -> String {
    match result {
        Ok(version) => version.clone(),
        Err(ClientError::Timeout { timeout, .. }) => format!("timed out after {:?}", timeout),
        Err(e) => format!("error: {}", e),
    }
}

/// Render rows as a box-drawn table.
pub fn render_nodes(rows: &[NodeRow]) -> String {
    let headers = ["Node", "Address", "Queued", "Attempts", "Version"];
    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.which.to_string(),
                row.address.to_string(),
                row.queued.to_string(),
                row.reconnect_attempts.to_string(),
                row.outcome.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}\n", left, segments.join(mid), right)
    };
    let line = |values: &[String]| {
        let padded: Vec<String> = values
            .iter()
            .zip(widths)
            .map(|(value, width)| format!(" {:<width$} ", value, width = width))
            .collect();
        format!("│{}│\n", padded.join("│"))
    };

    let mut out = rule("┌", "┬", "┐");
    out.push_str(&line(&headers.map(String::from)));
    out.push_str(&rule("├", "┼", "┤"));
    for values in &cells {
        out.push_str(&line(values));
    }
    out.push_str(&rule("└", "┴", "┘"));
    out
}

pub fn display_nodes(rows: &[NodeRow]) {
    if rows.is_empty() {
        println!("No nodes configured.");
        return;
    }
    print!("{}", render_nodes(rows));
}
