//! Plain-text table rendering for reports printed to the terminal.

use std::borrow::Cow;
use std::fmt::Write as _;

use itertools::Itertools;

/// Cells wider than this are clipped with a trailing `...`.
pub const MAX_CELL_WIDTH: usize = 72;

const ELLIPSIS: &str = "...";

pub fn render_table<H, C>(headers: &[H], rows: &[Vec<C>]) -> String
where
    H: AsRef<str>,
    C: AsRef<str>,
{
    let headers = headers.iter().map(|h| prepare_cell(h.as_ref())).collect_vec();
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|c| prepare_cell(c.as_ref())).collect_vec())
        .collect_vec();

    let mut widths = headers.iter().map(|h| display_width(h)).collect_vec();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&headers, &widths));

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect_vec();
    let separator = separator_widths.iter().map(|w| "-".repeat(*w)).collect_vec();
    let _ = writeln!(output, "{}", format_row(&separator, &separator_widths));

    for row in &rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table<H, C>(headers: &[H], rows: &[Vec<C>])
where
    H: AsRef<str>,
    C: AsRef<str>,
{
    print!("{}", render_table(headers, rows));
}

fn format_row<S: AsRef<str>>(values: &[S], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let value = value.as_ref();
            let padding = width.saturating_sub(display_width(value));
            format!("{value}{}", " ".repeat(padding))
        })
        .join("  ");
    line.trim_end_matches(' ').to_string()
}

fn prepare_cell(value: &str) -> String {
    clip(&sanitize_cell(value), MAX_CELL_WIDTH)
}

fn clip(value: &str, max: usize) -> String {
    if value.contains('\u{1b}') || display_width(value) <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(ELLIPSIS.len())).collect();
    format!("{kept}{ELLIPSIS}")
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // ANSI escape, e.g. \x1b[31m
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
