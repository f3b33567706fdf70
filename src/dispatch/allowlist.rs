/// Hostname policy: the configured domain and every subdomain of it.
#[derive(Debug, Clone)]
pub struct AllowList {
    domain: String,
}

impl AllowList {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim().trim_end_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn allows(&self, hostname: &str) -> bool {
        if hostname.is_empty() || self.domain.is_empty() {
            return false;
        }
        let hostname = hostname.to_ascii_lowercase();
        if hostname == self.domain {
            return true;
        }
        hostname
            .strip_suffix(&self.domain)
            .map(|prefix| prefix.ends_with('.') && prefix.len() > 1)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_domain_and_subdomains() {
        let list = AllowList::new("sora.chatgpt.com");
        assert!(list.allows("sora.chatgpt.com"));
        assert!(list.allows("videos.sora.chatgpt.com"));
        assert!(list.allows("a.b.sora.chatgpt.com"));
        assert!(list.allows("SORA.ChatGPT.com"));
    }

    #[test]
    fn test_rejects_lookalikes() {
        let list = AllowList::new("sora.chatgpt.com");
        assert!(!list.allows("evil.com"));
        assert!(!list.allows("evilsora.chatgpt.com"));
        assert!(!list.allows("sora.chatgpt.com.evil.com"));
        assert!(!list.allows("chatgpt.com"));
        assert!(!list.allows(".sora.chatgpt.com"));
        assert!(!list.allows(""));
    }
}
