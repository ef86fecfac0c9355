//! Candidate link extraction.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Scheme and host are matched case-insensitively; the path keeps its case.
const LINK_PATTERN: &str = r"(?i:https?://(?:(?:vt|vm|www|m)\.)?tiktok\.com)/\S+";

fn link_regex() -> &'static Regex {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    LINK_RE.get_or_init(|| Regex::new(LINK_PATTERN).expect("link pattern is valid"))
}

/// Returns the unique video links in `text`, in order of first occurrence.
pub fn extract_links(text: Option<&str>) -> Vec<String> {
    let Some(text) = text else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    link_regex()
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|link| seen.insert(*link))
        .map(str::to_string)
        .collect()
}

/// Returns true if `url` needs a redirect lookup to become canonical: it is
/// on one of `short_hosts`, or it is a `tiktok.com/t/<code>` share link.
pub fn is_short_link(url: &str, short_hosts: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if short_hosts
        .iter()
        .any(|short| short.eq_ignore_ascii_case(host))
    {
        return true;
    }

    let on_main_site = ["tiktok.com", "www.tiktok.com", "m.tiktok.com"]
        .iter()
        .any(|main| main.eq_ignore_ascii_case(host));
    on_main_site && parsed.path().starts_with("/t/")
}

pub fn default_short_hosts() -> Vec<String> {
    vec!["vt.tiktok.com".to_string(), "vm.tiktok.com".to_string()]
}
