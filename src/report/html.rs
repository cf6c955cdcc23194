use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::{format_size, rows, ReportOptions, Row};
use crate::scan::ScanResult;

const CHART_BARS: usize = 10;
const BAR_HEIGHT: usize = 22;
const CHART_WIDTH: usize = 640;
const LABEL_WIDTH: usize = 180;

const STYLE: &str = "\
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 2rem; color: #1f2933; background: #f7f9fb; }
h1 { font-size: 1.6rem; margin-bottom: 0.2rem; }
.meta { color: #616e7c; font-size: 0.9rem; margin-bottom: 1.5rem; }
.cards { display: flex; flex-wrap: wrap; gap: 1rem; margin-bottom: 2rem; }
.card { background: #fff; border-radius: 8px; padding: 1rem 1.4rem; box-shadow: 0 1px 3px rgba(0,0,0,.12); min-width: 150px; }
.card .label { color: #616e7c; font-size: 0.8rem; text-transform: uppercase; }
.card .value { font-size: 1.4rem; font-weight: 600; }
.note { background: #fff8e1; border-left: 4px solid #f0b429; padding: 0.6rem 1rem; margin-bottom: 1.5rem; }
table { border-collapse: collapse; width: 100%; background: #fff; box-shadow: 0 1px 3px rgba(0,0,0,.12); }
th, td { padding: 0.45rem 0.8rem; border-bottom: 1px solid #e4e7eb; text-align: left; }
th { background: #243b53; color: #fff; font-weight: 500; }
td.num { text-align: right; font-variant-numeric: tabular-nums; }
tr.transitive td:first-child { padding-left: 1.6rem; }
.bar { fill: #2186eb; }
.bar-label { font-size: 12px; fill: #1f2933; }
";

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn card(html: &mut String, label: &str, value: &str) {
    let _ = write!(
        html,
        "<div class=\"card\"><div class=\"label\">{}</div><div class=\"value\">{}</div></div>",
        escape(label),
        escape(value)
    );
}

fn median(sizes: &mut [u64]) -> u64 {
    if sizes.is_empty() {
        return 0;
    }
    sizes.sort_unstable();
    let mid = sizes.len() / 2;
    if sizes.len() % 2 == 1 {
        sizes[mid]
    } else {
        (sizes[mid - 1] + sizes[mid]) / 2
    }
}

fn chart(html: &mut String, rows: &[Row]) {
    let bars: Vec<&Row> = rows.iter().take(CHART_BARS).collect();
    let largest = bars
        .iter()
        .map(|row| row.package.size.bytes)
        .max()
        .unwrap_or(0)
        .max(1);
    let height = bars.len() * (BAR_HEIGHT + 6) + 6;
    let scale = (CHART_WIDTH - LABEL_WIDTH - 90) as f64;

    let _ = write!(
        html,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" role=\"img\" aria-label=\"Largest packages\">",
        CHART_WIDTH, height
    );
    for (i, row) in bars.iter().enumerate() {
        let y = 6 + i * (BAR_HEIGHT + 6);
        let width = ((row.package.size.bytes as f64 / largest as f64) * scale).max(1.0);
        let text_y = y + BAR_HEIGHT / 2 + 4;
        let _ = write!(
            html,
            "<text class=\"bar-label\" x=\"0\" y=\"{text_y}\">{name}</text>\
             <rect class=\"bar\" x=\"{LABEL_WIDTH}\" y=\"{y}\" width=\"{width:.1}\" height=\"{BAR_HEIGHT}\" rx=\"3\"><title>{name}: {size}</title></rect>\
             <text class=\"bar-label\" x=\"{label_x:.1}\" y=\"{text_y}\">{size}</text>",
            name = escape(row.package.distribution.name()),
            size = escape(&format_size(row.package.size.bytes)),
            label_x = LABEL_WIDTH as f64 + width + 6.0,
        );
    }
    html.push_str("</svg>");
}

fn table(html: &mut String, rows: &[Row], include_deps: bool) {
    html.push_str("<table><thead><tr><th>Package</th><th>Version</th><th>Size</th>");
    if include_deps {
        html.push_str("<th>With deps</th>");
    }
    html.push_str("<th>Files</th><th>Depth</th><th>Type</th><th>Chain</th><th>Editable</th></tr></thead><tbody>");

    for row in rows {
        let package = row.package;
        let kind = if package.node.is_direct {
            "direct"
        } else {
            "transitive"
        };
        let _ = write!(
            html,
            "<tr class=\"{}\"><td title=\"{}\">{}</td><td>{}</td><td class=\"num\">{}</td>",
            kind,
            escape(&package.distribution.location().display().to_string()),
            escape(package.distribution.name()),
            escape(package.distribution.version()),
            escape(&format_size(package.size.bytes)),
        );
        if include_deps {
            let with_deps = row.with_deps.map(|totals| totals.bytes).unwrap_or_default();
            let _ = write!(html, "<td class=\"num\">{}</td>", escape(&format_size(with_deps)));
        }
        let _ = write!(
            html,
            "<td class=\"num\">{}</td><td class=\"num\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            package.size.files,
            package.node.depth,
            kind,
            escape(&package.node.chain()),
            if package.distribution.is_editable() { "yes" } else { "" },
        );
    }
    html.push_str("</tbody></table>");
}

/// A self-contained HTML page: summary cards, a bar chart of the largest packages and the
/// package table. No external assets are referenced.
pub fn render_html(
    result: &ScanResult,
    options: &ReportOptions,
    generated_at: DateTime<Utc>,
) -> String {
    let rows = rows(result, options);
    let mut html = String::new();

    let site_packages: Vec<String> = result
        .site_packages
        .iter()
        .map(|path| path.display().to_string())
        .collect();

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>pkgsizer report</title>\n<style>\n{}</style>\n</head>\n<body>\n\
         <h1>Package size report</h1>\n<div class=\"meta\">{} &middot; generated {}</div>\n",
        STYLE,
        escape(&site_packages.join(", ")),
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    let direct = result.packages.iter().filter(|p| p.node.is_direct).count();
    let mut sizes: Vec<u64> = result.packages.iter().map(|p| p.size.bytes).collect();
    let average = if sizes.is_empty() {
        0
    } else {
        result.total.bytes / sizes.len() as u64
    };
    let largest = result
        .packages
        .iter()
        .max_by(|a, b| a.size.bytes.cmp(&b.size.bytes).then_with(|| b.name().cmp(a.name())));

    html.push_str("<div class=\"cards\">");
    card(&mut html, "Packages", &result.packages.len().to_string());
    card(&mut html, "Total size", &format_size(result.total.bytes));
    card(&mut html, "Files", &result.total.files.to_string());
    card(
        &mut html,
        "Direct / transitive",
        &format!("{} / {}", direct, result.packages.len() - direct),
    );
    if let Some(largest) = largest {
        card(
            &mut html,
            "Largest",
            &format!(
                "{} ({})",
                largest.distribution.name(),
                format_size(largest.size.bytes)
            ),
        );
    }
    card(&mut html, "Median size", &format_size(median(&mut sizes)));
    card(&mut html, "Average size", &format_size(average));
    if options.include_deps {
        if let Some(heaviest) = rows.iter().max_by_key(|row| row.with_deps.map(|t| t.bytes)) {
            let bytes = heaviest.with_deps.map(|t| t.bytes).unwrap_or_default();
            card(
                &mut html,
                "Largest with deps",
                &format!(
                    "{} ({})",
                    heaviest.package.distribution.name(),
                    format_size(bytes)
                ),
            );
        }
    }
    if result.warnings > 0 {
        card(&mut html, "Unreadable files", &result.warnings.to_string());
    }
    html.push_str("</div>\n");

    if result.truncated {
        html.push_str(
            "<div class=\"note\">The depth limit cut off some dependencies; totals are partial.</div>\n",
        );
    }

    if !rows.is_empty() {
        html.push_str("<h2>Largest packages</h2>\n");
        chart(&mut html, &rows);
        html.push('\n');
    }

    let _ = write!(
        html,
        "<h2>Packages</h2>\n<p class=\"meta\">Showing {} of {} packages</p>\n",
        rows.len(),
        result.packages.len()
    );
    table(&mut html, &rows, options.include_deps);
    html.push_str("\n</body>\n</html>\n");
    html
}
