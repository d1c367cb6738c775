//! Direct submission - build scan links pasted by a user

use std::sync::OnceLock;

use contracts::BuildDescriptor;
use regex::Regex;

fn scan_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // build ids are ASCII word characters only
    PATTERN.get_or_init(|| {
        Regex::new(r"(https?://\S+)/s/([A-Za-z0-9_]+)").expect("static pattern")
    })
}

/// Find every `<server>/s/<buildId>` link in `text`, in order of appearance.
///
/// Submitted builds skip tag gating (`ignore_tags = true`).
pub fn extract_scan_urls(text: &str) -> Vec<BuildDescriptor> {
    scan_url_pattern()
        .captures_iter(text)
        .map(|caps| BuildDescriptor::new(&caps[1], &caps[2], true))
        .collect()
}
