//! HTML rendering for watch emails.
//!
//! Pure string building; every piece of scraped text passes through
//! [`escape_html`] before it lands in markup.

use crate::types::PostingsBySource;

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// One `<h3>` + table section per source, sources in name order.
pub fn build_tables(by_source: &PostingsBySource) -> String {
    let mut sections = Vec::with_capacity(by_source.len());
    for (source, postings) in by_source {
        let mut table = String::from(
            "<table border='1' cellspacing='0' cellpadding='6'><tr><th>Title</th><th>Link</th></tr>",
        );
        for posting in postings {
            let title = match posting.title.trim() {
                "" => "(no title)",
                t => t,
            };
            let url = escape_html(&posting.url);
            table.push_str(&format!(
                "<tr><td>{}</td><td><a href=\"{url}\">{url}</a></td></tr>",
                escape_html(title)
            ));
        }
        table.push_str("</table>");
        sections.push(format!("<h3>{}</h3>\n{table}", escape_html(source)));
    }
    sections.join("\n")
}

/// Wrap a fragment in a `<div>` with optional heading and intro line.
pub fn wrap_document(fragment: &str, heading: Option<&str>, intro: Option<&str>) -> String {
    let mut parts = vec!["<div>".to_owned()];
    if let Some(h) = heading.filter(|h| !h.is_empty()) {
        parts.push(format!("<h2>{}</h2>", escape_html(h)));
    }
    if let Some(i) = intro.filter(|i| !i.is_empty()) {
        parts.push(format!("<p>{}</p>", escape_html(i)));
    }
    parts.push(fragment.to_owned());
    parts.push("</div>".to_owned());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{group_by_source, Posting};

    #[test]
    fn escapes_quotes_and_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom's & co</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom&#x27;s &amp; co&lt;/a&gt;"
        );
    }

    #[test]
    fn tables_are_sorted_by_source_and_escaped() {
        let postings = vec![
            Posting::new("lever:zeta", "p", "Eng <Lead>", "https://z/1?a=1&b=2"),
            Posting::new("lever:acme", "p", "", "https://a/1"),
        ];
        let html = build_tables(&group_by_source(&postings));
        let acme = html.find("<h3>lever:acme</h3>").unwrap();
        let zeta = html.find("<h3>lever:zeta</h3>").unwrap();
        assert!(acme < zeta);
        assert!(html.contains("<td>(no title)</td>"));
        assert!(html.contains("<td>Eng &lt;Lead&gt;</td>"));
        assert!(html.contains("<a href=\"https://z/1?a=1&amp;b=2\">"));
        assert!(html.contains("<tr><th>Title</th><th>Link</th></tr>"));
    }

    #[test]
    fn wrap_document_adds_heading_and_intro() {
        let html = wrap_document("<p>x</p>", Some("Career Watch — Sam"), Some("2 new postings"));
        assert!(html.starts_with("<div>\n<h2>Career Watch — Sam</h2>\n<p>2 new postings</p>"));
        assert!(html.ends_with("<p>x</p>\n</div>"));
    }

    #[test]
    fn wrap_document_skips_missing_parts() {
        assert_eq!(wrap_document("frag", None, None), "<div>\nfrag\n</div>");
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(build_tables(&PostingsBySource::new()), "");
    }
}
