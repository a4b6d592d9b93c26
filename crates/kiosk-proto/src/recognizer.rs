//! Video URL recognition.
//!
//! A [`RecognizerRegistry`] holds platform recognizers in registration
//! order. The first recognizer whose `matches` accepts a URL owns it: if its
//! `extract` then fails, the URL is rejected without consulting the rest.

use url::Url;

/// A video identity extracted from a supported URL.
///
/// Only constructible through [`ParsedVideo::new`], which enforces the
/// owning recognizer's id rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVideo {
    platform: String,
    video_id: String,
    original_url: String,
}

impl ParsedVideo {
    pub fn new(
        recognizer: &dyn UrlRecognizer,
        video_id: &str,
        original_url: &str,
    ) -> Option<Self> {
        if !recognizer.is_valid_id(video_id) {
            return None;
        }
        Some(Self {
            platform: recognizer.platform().to_string(),
            video_id: video_id.to_string(),
            original_url: original_url.to_string(),
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn original_url(&self) -> &str {
        &self.original_url
    }
}

pub trait UrlRecognizer: Send + Sync {
    /// Platform tag stored with each view, e.g. `"youtube"`.
    fn platform(&self) -> &'static str;

    /// Cheap shape check: does this URL belong to the platform?
    fn matches(&self, url: &str) -> bool;

    /// The platform's rule for a well-formed video id.
    fn is_valid_id(&self, id: &str) -> bool;

    /// Full parse. `None` when the URL is malformed or the id is invalid.
    fn extract(&self, url: &str) -> Option<ParsedVideo>;
}

// ── YouTube ───────────────────────────────────────────────────────────────────

pub struct YouTubeRecognizer;

impl YouTubeRecognizer {
    const WATCH_PATTERNS: [&'static str; 3] = [
        "youtube.com/watch",
        "www.youtube.com/watch",
        "m.youtube.com/watch",
    ];
    const SHORT_PATTERN: &'static str = "youtu.be/";
    const EMBED_PATTERN: &'static str = "youtube.com/embed/";
    const ID_LEN: usize = 11;
}

impl UrlRecognizer for YouTubeRecognizer {
    fn platform(&self) -> &'static str {
        "youtube"
    }

    fn matches(&self, url: &str) -> bool {
        let lower = url.trim().to_ascii_lowercase();
        Self::WATCH_PATTERNS.iter().any(|p| lower.contains(p))
            || lower.contains(Self::SHORT_PATTERN)
            || lower.contains(Self::EMBED_PATTERN)
    }

    /// 11 characters from `[A-Za-z0-9_-]`.
    fn is_valid_id(&self, id: &str) -> bool {
        id.len() == Self::ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    fn extract(&self, url: &str) -> Option<ParsedVideo> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();

        let video_id: Option<String> = if host.contains("youtu.be") {
            // youtu.be/VIDEO_ID
            parsed
                .path_segments()
                .and_then(|mut segs| segs.next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        } else if host.contains("youtube.com") && parsed.path().contains("/embed/") {
            // youtube.com/embed/VIDEO_ID
            parsed
                .path()
                .split("/embed/")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .map(str::to_string)
        } else if host.contains("youtube.com") && parsed.path().contains("watch") {
            // youtube.com/watch?v=VIDEO_ID
            parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())
        } else {
            None
        };

        ParsedVideo::new(self, &video_id?, url)
    }
}

// ── registry ──────────────────────────────────────────────────────────────────

pub struct RecognizerRegistry {
    recognizers: Vec<Box<dyn UrlRecognizer>>,
}

impl RecognizerRegistry {
    /// An empty registry. Nothing is recognized until something is registered.
    pub fn empty() -> Self {
        Self {
            recognizers: Vec::new(),
        }
    }

    /// Registry with every built-in platform.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(YouTubeRecognizer));
        registry
    }

    /// Add a recognizer after the existing ones.
    pub fn register(&mut self, recognizer: Box<dyn UrlRecognizer>) {
        self.recognizers.push(recognizer);
    }

    pub fn platforms(&self) -> Vec<&'static str> {
        self.recognizers.iter().map(|r| r.platform()).collect()
    }

    pub fn recognize(&self, url: &str) -> Option<ParsedVideo> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let owner = self.recognizers.iter().find(|r| r.matches(url))?;
        let parsed = owner.extract(url);
        if parsed.is_none() {
            tracing::debug!(
                "[recognizer] {} matched but could not extract: {}",
                owner.platform(),
                url
            );
        }
        parsed
    }
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    fn recognize(url: &str) -> Option<ParsedVideo> {
        RecognizerRegistry::with_defaults().recognize(url)
    }

    #[test]
    fn test_watch_url() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let v = recognize(url).unwrap();
        assert_eq!(v.platform(), "youtube");
        assert_eq!(v.video_id(), ID);
        assert_eq!(v.original_url(), url);
    }

    #[test]
    fn test_equivalent_shapes_give_same_id() {
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42s",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "  https://youtu.be/dQw4w9WgXcQ\n",
        ];
        for url in urls {
            let v = recognize(url).unwrap_or_else(|| panic!("not recognized: {:?}", url));
            assert_eq!(v.video_id(), ID, "url: {}", url);
        }
    }

    #[test]
    fn test_invalid_ids_rejected() {
        // 10 chars
        assert!(recognize("https://www.youtube.com/watch?v=dQw4w9WgXc").is_none());
        assert!(recognize("https://www.youtube.com/watch?v=short").is_none());
        assert!(recognize("https://www.youtube.com/watch?v=invalid!!!").is_none());
        // 12 chars
        assert!(recognize("https://youtu.be/dQw4w9WgXcQQ").is_none());
        assert!(recognize("https://www.youtube.com/watch").is_none());
    }

    #[test]
    fn test_unsupported_and_malformed() {
        assert!(recognize("https://vimeo.com/123456789").is_none());
        assert!(recognize("").is_none());
        assert!(recognize("   ").is_none());
        assert!(recognize("not a url").is_none());
        assert!(recognize("https://example.com").is_none());
        // bare id, no host
        assert!(recognize(ID).is_none());
        // right shape, no scheme
        assert!(recognize("www.youtube.com/watch?v=dQw4w9WgXcQ").is_none());
    }

    struct AnyHost;

    impl UrlRecognizer for AnyHost {
        fn platform(&self) -> &'static str {
            "any"
        }
        fn matches(&self, _url: &str) -> bool {
            true
        }
        fn is_valid_id(&self, id: &str) -> bool {
            !id.is_empty()
        }
        fn extract(&self, url: &str) -> Option<ParsedVideo> {
            ParsedVideo::new(self, url, url)
        }
    }

    #[test]
    fn test_registration_order_and_ownership() {
        let mut registry = RecognizerRegistry::with_defaults();
        registry.register(Box::new(AnyHost));
        assert_eq!(registry.platforms(), vec!["youtube", "any"]);

        // Later recognizers pick up what earlier ones don't match.
        let v = registry.recognize("https://vimeo.com/1").unwrap();
        assert_eq!(v.platform(), "any");

        // A match that fails extraction is not handed to the next recognizer.
        assert!(registry.recognize("https://youtu.be/short").is_none());
    }

    #[test]
    fn test_parsed_video_enforces_id_rule() {
        assert!(ParsedVideo::new(&YouTubeRecognizer, "short", "u").is_none());
        assert!(ParsedVideo::new(&YouTubeRecognizer, ID, "u").is_some());
    }

    #[test]
    fn test_empty_registry_recognizes_nothing() {
        let registry = RecognizerRegistry::empty();
        assert!(registry.recognize("https://youtu.be/dQw4w9WgXcQ").is_none());
    }
}
