//! Wildcard matching for policy resources, actions and `StringLike` values
//!
//! Supports wildcards:
//! - `*` - Matches any run of characters, including `/` (e.g. `arn:aws:s3:::site/*`)
//! - `?` - Matches exactly one character
//!
//! Unlike filesystem globs, resource identifiers are opaque strings, so `*`
//! does not stop at path separators.

/// Pattern matcher for resource identifiers
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if `value` matches `pattern` (case-sensitive)
    ///
    /// # Examples
    /// ```
    /// use sitebinder::core::iam::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::site/img/logo.png"));
    /// assert!(PatternMatcher::matches("s3:Get?bject", "s3:GetObject"));
    /// assert!(!PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::other/index.html"));
    /// ```
    pub fn matches(pattern: &str, value: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let value: Vec<char> = value.chars().collect();
        Self::match_chars(&pattern, &value)
    }

    /// Case-insensitive variant (policy actions are case-insensitive)
    pub fn matches_ignore_case(pattern: &str, value: &str) -> bool {
        Self::matches(&pattern.to_lowercase(), &value.to_lowercase())
    }

    /// Whether `pattern` contains any wildcard
    pub fn is_wildcard(pattern: &str) -> bool {
        pattern.contains('*') || pattern.contains('?')
    }

    /// Greedy matching with single-star backtracking
    fn match_chars(pattern: &[char], value: &[char]) -> bool {
        let (mut p, mut v) = (0, 0);
        // Position of the last `*` seen and the value index it was tried at
        let mut star: Option<(usize, usize)> = None;

        while v < value.len() {
            if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
                p += 1;
                v += 1;
            } else if p < pattern.len() && pattern[p] == '*' {
                star = Some((p, v));
                p += 1;
            } else if let Some((star_p, star_v)) = star {
                // Let the last `*` swallow one more character
                p = star_p + 1;
                v = star_v + 1;
                star = Some((star_p, star_v + 1));
            } else {
                return false;
            }
        }

        pattern[p..].iter().all(|&c| c == '*')
    }
}
