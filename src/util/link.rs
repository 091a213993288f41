//! `Link` response header parsing (RFC 8288 subset used by registries)

/// One link of a `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub rel: String,
    pub url: String,
}

/// Splits `<url>; rel="next", <url>; rel="prev"` into ordered links.
/// Entries without a `<url>` are skipped.
pub fn parse_links(header: &str) -> Vec<Link> {
    let mut links = Vec::new();
    for entry in split_entries(header) {
        let mut url = None;
        let mut rel = String::new();
        for attr in entry.split(';') {
            let attr = attr.trim();
            if let Some(inner) = attr.strip_prefix('<').and_then(|a| a.strip_suffix('>')) {
                url = Some(inner.to_string());
            } else if let Some((key, value)) = attr.split_once('=') {
                if key.trim().eq_ignore_ascii_case("rel") {
                    rel = value.trim().trim_matches('"').to_string();
                }
            }
        }
        if let Some(url) = url {
            links.push(Link { rel, url });
        }
    }
    links
}

/// URL of the `rel="next"` link, if any
pub fn next_link(header: &str) -> Option<String> {
    parse_links(header)
        .into_iter()
        .find(|link| link.rel.split_whitespace().any(|r| r == "next"))
        .map(|link| link.url)
}

/// Commas separate links, but URLs may contain commas inside `<...>`
fn split_entries(header: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_url = false;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '<' if !in_quotes => in_url = true,
            '>' if !in_quotes => in_url = false,
            '"' if !in_url => in_quotes = !in_quotes,
            ',' if !in_url && !in_quotes => {
                entries.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&header[start..]);
    entries.into_iter().map(str::trim).filter(|e| !e.is_empty()).collect()
}
