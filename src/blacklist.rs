//! User-agent blacklist for crawler and script traffic

/// Reference list of common bot markers
pub const DEFAULT_USER_AGENT_BLACKLIST: &[&str] = &[
    "wget",
    "python",
    "perl",
    "msnbot",
    "netresearch",
    "bot",
    "archive",
    "crawl",
    "googlebot",
    "msn",
    "php",
    "panscient",
    "berry",
    "yandex",
    "bing",
    "fluffy",
];

/// Case-insensitive substring match against configured terms
#[derive(Debug, Clone, Default)]
pub struct UserAgentBlacklist {
    terms: Vec<String>,
}

impl UserAgentBlacklist {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    /// Whether requests with this user agent should be ignored
    pub fn is_blocked(&self, user_agent: &str) -> bool {
        if self.terms.is_empty() {
            return false;
        }
        let ua = user_agent.to_lowercase();
        self.terms.iter().any(|t| ua.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_terms_block_crawlers() {
        let blacklist = UserAgentBlacklist::new(DEFAULT_USER_AGENT_BLACKLIST);
        assert!(blacklist.is_blocked("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(blacklist.is_blocked("python-requests/2.31"));
        assert!(blacklist.is_blocked("Wget/1.21"));
        assert!(!blacklist.is_blocked(
            "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0"
        ));
    }

    #[test]
    fn test_terms_are_case_insensitive() {
        let blacklist = UserAgentBlacklist::new(["CURL", "  "]);
        assert!(blacklist.is_blocked("curl/8.4.0"));
        assert!(!blacklist.is_blocked(""));
    }

    #[test]
    fn test_empty_blacklist_blocks_nothing() {
        let blacklist = UserAgentBlacklist::default();
        assert!(!blacklist.is_blocked("bot"));
    }
}
