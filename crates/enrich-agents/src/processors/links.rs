//! Anchor extraction and URL resolution for the crawl tiers

use std::sync::LazyLock;

use regex::Regex;

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"'#]+)["'][^>]*>(.*?)</a>"#)
        .expect("ANCHOR regex should compile")
});

static SCHEDULE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(bell|schedule|school[-_\s]?hours|start[-_\s]times?|calendar)")
        .expect("SCHEDULE_HINT regex should compile")
});

static SUBSITE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^/(schools?|campus(es)?|o)/[a-z0-9_-]+/?$")
        .expect("SUBSITE_PATH regex should compile")
});

static DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(pdf|png|jpe?g|gif|tiff?)(\?.*)?$").expect("DOCUMENT regex should compile")
});

static ORIGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(https?://[^/?#]+)").expect("ORIGIN regex should compile")
});

/// Links worth following from one page, each list in page order without
/// duplicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    /// Pages whose URL or anchor text mentions schedules
    pub schedule: Vec<String>,
    /// Individual school sites within the district
    pub subsites: Vec<String>,
    /// Linked PDFs and images, schedule-like ones first
    pub documents: Vec<String>,
}

pub fn page_links(base: &str, html: &str) -> PageLinks {
    let mut links = PageLinks::default();
    let mut hinted_docs = Vec::new();
    let mut other_docs = Vec::new();
    let base_host = site_host(base);

    for caps in ANCHOR.captures_iter(html) {
        let Some(url) = resolve(base, caps[1].trim()) else {
            continue;
        };
        let hinted = SCHEDULE_HINT.is_match(&url) || SCHEDULE_HINT.is_match(&caps[2]);

        if DOCUMENT.is_match(&url) {
            push_unique(if hinted { &mut hinted_docs } else { &mut other_docs }, url);
        } else if hinted {
            push_unique(&mut links.schedule, url);
        } else if is_subsite(&url, base, base_host.as_deref()) {
            push_unique(&mut links.subsites, url);
        }
    }

    links.documents = hinted_docs;
    for doc in other_docs {
        push_unique(&mut links.documents, doc);
    }
    links
}

/// Resolve an href against the page it appeared on
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(href.to_string());
    }
    if lower.starts_with("mailto:") || lower.starts_with("tel:") || lower.starts_with("javascript:") {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }

    let origin = origin(base)?;
    if href.starts_with('/') {
        return Some(format!("{origin}{href}"));
    }
    let path = &base[origin.len()..];
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    Some(format!("{origin}{dir}{href}"))
}

pub(crate) fn origin(url: &str) -> Option<&str> {
    ORIGIN.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn host(url: &str) -> Option<String> {
    let origin = origin(url)?;
    let authority = origin.split("://").nth(1)?;
    let host = authority.split(':').next()?;
    Some(host.to_ascii_lowercase())
}

/// Host without a leading `www.`
fn site_host(url: &str) -> Option<String> {
    host(url).map(|h| h.strip_prefix("www.").map(String::from).unwrap_or(h))
}

/// Same origin with a school path, or a host nested under the district's
fn is_subsite(url: &str, base: &str, base_host: Option<&str>) -> bool {
    let (Some(url_origin), Some(base_origin)) = (origin(url), origin(base)) else {
        return false;
    };
    if url_origin.eq_ignore_ascii_case(base_origin) {
        return SUBSITE_PATH.is_match(&url[url_origin.len()..]);
    }
    match (host(url), base_host) {
        (Some(h), Some(b)) => h.ends_with(&format!(".{b}")),
        _ => false,
    }
}

fn push_unique(list: &mut Vec<String>, url: String) {
    if !list.contains(&url) {
        list.push(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let base = "https://district.org/about/index.html";
        assert_eq!(resolve(base, "/bell").as_deref(), Some("https://district.org/bell"));
        assert_eq!(
            resolve(base, "hours.html").as_deref(),
            Some("https://district.org/about/hours.html")
        );
        assert_eq!(
            resolve(base, "//cdn.district.org/a.pdf").as_deref(),
            Some("https://cdn.district.org/a.pdf")
        );
        assert_eq!(
            resolve(base, "https://other.org/x").as_deref(),
            Some("https://other.org/x")
        );
        assert_eq!(resolve(base, "mailto:office@district.org"), None);
        assert_eq!(
            resolve("https://district.org", "bell").as_deref(),
            Some("https://district.org/bell")
        );
    }

    #[test]
    fn test_page_links_sorts_links_into_buckets() {
        let html = r#"
            <a href="/news">News</a>
            <a href="/o/lincoln-high">Lincoln High</a>
            <a href="https://mhs.district.org/">Monroe Middle</a>
            <a href="/departments/transport">Bus</a>
            <a class="nav" href="/page/school-hours">Hours</a>
            <a href="/docs/calendar.jpg">Calendar image</a>
            <a href="/docs/handbook.pdf">Handbook</a>
            <a href="/docs/2025.pdf">Bell Schedule (PDF)</a>
            <a href="/o/lincoln-high">Lincoln again</a>
            <a href="mailto:office@district.org">Email</a>
        "#;
        let links = page_links("https://district.org/", html);

        assert_eq!(links.schedule, vec!["https://district.org/page/school-hours"]);
        assert_eq!(
            links.subsites,
            vec![
                "https://district.org/o/lincoln-high",
                "https://mhs.district.org/"
            ]
        );
        assert_eq!(
            links.documents,
            vec![
                "https://district.org/docs/calendar.jpg",
                "https://district.org/docs/2025.pdf",
                "https://district.org/docs/handbook.pdf",
            ]
        );
    }
}
