//! Dashboard HTML rendering

use chrono::{Days, NaiveDate};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

use crate::report::{Report, ROOT_GROUP};
use crate::store::day_string;

const STYLE: &str = r#"
body{font-family:Arial,sans-serif;font-size:14px;margin:2em;}
nav a{margin-right:1em;}
table{border-collapse:collapse;border-spacing:0;margin-bottom:1.5em;}
td,th{border:1px solid black;padding:10px 5px;text-align:left;vertical-align:top;}
th{font-weight:normal;background:#eee;}
td.count{text-align:right;}
"#;

/// Sorted view of one group: entries by count descending, then label
fn sorted_groups(report: &Report) -> Vec<(&str, u64, Vec<(&str, u64)>)> {
    let mut groups: Vec<_> = report
        .url_hits
        .iter()
        .map(|(group, entries)| {
            let mut rows: Vec<(&str, u64)> = entries.iter().map(|(e, c)| (e.as_str(), *c)).collect();
            rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let total: u64 = rows.iter().map(|(_, c)| *c).sum();
            (group.as_str(), total, rows)
        })
        .collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    groups
}

fn day_link(base: &str, key: Option<&str>, day: NaiveDate) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("date", &day_string(day));
    if let Some(key) = key {
        query.append_pair("k", key);
    }
    format!("{}?{}", base, query.finish())
}

/// Render `report` as a standalone HTML page.
///
/// `base` is the dashboard path; `key` is carried into the navigation links.
pub fn render_dashboard(report: &Report, base: &str, key: Option<&str>) -> String {
    let date = day_string(report.date);
    let mut html = String::with_capacity(4096);

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Page views {date}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n"
    );

    html.push_str("<nav>");
    if let Some(prev) = report.date.checked_sub_days(Days::new(1)) {
        let _ = write!(
            html,
            "<a href=\"{}\">&larr; previous day</a>",
            encode_double_quoted_attribute(&day_link(base, key, prev)),
        );
    }
    if let Some(next) = report.date.checked_add_days(Days::new(1)) {
        let _ = write!(
            html,
            "<a href=\"{}\">next day &rarr;</a>",
            encode_double_quoted_attribute(&day_link(base, key, next)),
        );
    }
    html.push_str("</nav>\n");

    let _ = write!(
        html,
        "<h1>{date}</h1>\n<p>Sessions: <strong>{}</strong> &middot; Hits: <strong>{}</strong></p>\n",
        report.session_count,
        report.total_hits(),
    );

    if report.url_hits.is_empty() {
        html.push_str("<p>No page views recorded.</p>\n");
    }

    for (group, total, rows) in sorted_groups(report) {
        let title = if group == ROOT_GROUP { "/" } else { group };
        let _ = write!(
            html,
            "<table>\n<tr><th>{}</th><th>{}</th></tr>\n",
            encode_text(title),
            total
        );
        for (entry, count) in rows {
            let _ = write!(
                html,
                "<tr><td>{}</td><td class=\"count\">{}</td></tr>\n",
                encode_text(entry),
                count
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}
