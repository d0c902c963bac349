use regex::Regex;

/// Fixed deep-link template; the token follows `startapp=`.
pub const LINK_PREFIX: &str = "https://t.me/xrocket/app?startapp=";

const LINK_PATTERN: &str = r"https://t\.me/xrocket/app\?startapp=(\w+)?";

/// Stateless deep-link extractor.
///
/// Free text is scanned for every occurrence; a button URL is only matched at
/// position 0 since a button carries exactly one authoritative target.
#[derive(Clone, Debug)]
pub struct LinkMatcher {
    scan: Regex,
    anchored: Regex,
}

impl Default for LinkMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMatcher {
    pub fn new() -> Self {
        Self {
            scan: Regex::new(LINK_PATTERN).expect("valid regex"),
            anchored: Regex::new(&format!("^{LINK_PATTERN}")).expect("valid regex"),
        }
    }

    /// All non-overlapping links in `text`, in order, rebuilt as prefix + token.
    pub fn extract_from_text(&self, text: &str) -> Vec<String> {
        self.scan
            .captures_iter(text)
            .map(|caps| {
                let token = caps.get(1).map_or("", |m| m.as_str());
                format!("{LINK_PREFIX}{token}")
            })
            .collect()
    }

    /// The button's URL itself if it starts with the link template.
    pub fn extract_from_button_url(&self, url: &str) -> Option<String> {
        self.anchored.is_match(url).then(|| url.to_string())
    }
}
