//! Robots.txt rule engine
//!
//! Parses the raw bytes of a robots.txt document into an ordered set of
//! prefix rules plus an optional crawl delay, for one named agent.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum number of warning messages kept for one document
pub const MAX_WARNINGS: usize = 5;

/// Crawl delays above this value (in milliseconds) disallow the whole host
pub const MAX_CRAWL_DELAY_MS: u64 = 200_000;

const USER_AGENT_FIELD: &str = "user-agent:";
const DISALLOW_FIELD: &str = "disallow:";
const ALLOW_FIELD: &str = "allow:";
const CRAWL_DELAY_FIELD: &str = "crawl-delay:";
const SITEMAP_FIELD: &str = "sitemap:";
const HOST_FIELD: &str = "host:";
const NO_INDEX_FIELD: &str = "noindex:";
const ACAP_FIELD: &str = "acap-";

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

static HTML_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(html|head|body)\s*>").expect("valid html pattern"));
static USER_AGENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)user-agent:").expect("valid user-agent pattern"));
static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

/// Errors from building a rule set
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RobotsError {
    #[error("Rules for status {0} must come from the response body")]
    SuccessStatus(u16),
}

/// A single path-prefix rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRule {
    /// Lower-cased, URL-decoded path prefix
    pub prefix: String,

    /// Whether paths matching the prefix may be fetched
    pub allow: bool,
}

/// Parsed robots.txt rules for one agent
///
/// Rules are checked in the order they appeared in the document and the
/// first matching prefix decides. A rule set is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RobotsRule>,
    crawl_delay: Option<Duration>,
    defer_visits: bool,
    warning_count: usize,
    warnings: Vec<String>,
}

impl RuleSet {
    /// Rule set that allows every path
    pub fn allow_all() -> Self {
        Self::single(String::new(), true)
    }

    /// Rule set that refuses every path
    pub fn allow_none() -> Self {
        Self::single("/".to_string(), false)
    }

    /// Rule set for a host whose policy could not be determined
    ///
    /// Nothing is allowed and callers should retry the host later.
    pub fn deferred() -> Self {
        let mut rules = Self::allow_none();
        rules.defer_visits = true;
        rules
    }

    fn single(prefix: String, allow: bool) -> Self {
        Self {
            rules: vec![RobotsRule { prefix, allow }],
            crawl_delay: None,
            defer_visits: false,
            warning_count: 0,
            warnings: Vec::new(),
        }
    }

    /// Builds rules for a robots.txt request that returned no usable body
    ///
    /// | Status | Result |
    /// |--------|--------|
    /// | 2xx | Error, rules must be parsed from the body |
    /// | 3xx | Deferred, nothing allowed |
    /// | 401, 403 | Nothing allowed |
    /// | other 4xx | Everything allowed |
    /// | 5xx and anything else | Deferred, nothing allowed |
    pub fn from_status_code(status: u16) -> Result<Self, RobotsError> {
        match status {
            200..=299 => Err(RobotsError::SuccessStatus(status)),
            401 | 403 => Ok(Self::allow_none()),
            400..=499 => Ok(Self::allow_all()),
            _ => Ok(Self::deferred()),
        }
    }

    /// Parses a robots.txt body for `agent_name`
    pub fn parse(agent_name: &str, content: &[u8]) -> Self {
        Self::parse_with_content_type(agent_name, content, None)
    }

    /// Parses a robots.txt body, using the response content type to spot
    /// HTML pages served in place of a robots.txt file
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Name the crawler matches against `User-agent` lines
    /// * `content` - Raw response body
    /// * `content_type` - Value of the `Content-Type` header, if any
    ///
    /// # Returns
    ///
    /// The rules that apply to `agent_name`. Malformed lines never fail the
    /// parse; they are counted in [`RuleSet::warning_count`].
    pub fn parse_with_content_type(
        agent_name: &str,
        content: &[u8],
        content_type: Option<&str>,
    ) -> Self {
        if content.is_empty() {
            return Self::allow_all();
        }

        let text = decode_body(content);
        let is_html_type = content_type
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false);

        let mut has_html = false;
        if is_html_type || HTML_PATTERN.is_match(&text) {
            if !USER_AGENT_PATTERN.is_match(&text) {
                tracing::trace!("Found HTML page instead of robots.txt");
                return Self::allow_all();
            }
            tracing::debug!("Found HTML markup in robots.txt");
            has_html = true;
        }

        let mut parser = RuleParser::new(agent_name, content.len());
        for raw_line in text
            .split(['\n', '\r', '\u{0085}', '\u{2028}', '\u{2029}'])
            .filter(|l| !l.is_empty())
        {
            let line = if has_html {
                TAG_PATTERN.replace_all(raw_line, "").into_owned()
            } else {
                raw_line.to_string()
            };
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line.as_str(),
            };
            let line = line.trim().to_lowercase();

            if parser.handle_line(&line) == LineOutcome::Stop {
                break;
            }
        }

        parser.finish()
    }

    /// Checks whether a URL path may be fetched
    ///
    /// The path is URL-decoded and lower-cased before matching. An empty path
    /// is treated as `/`, and `/robots.txt` is always allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        let path = decode_path(path).unwrap_or_else(|| path.to_string());

        if path.eq_ignore_ascii_case("/robots.txt") {
            return true;
        }
        if self.is_allow_all() {
            return true;
        }
        if self.is_allow_none() {
            return false;
        }

        let path = path.to_lowercase();
        self.rules
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .map(|rule| rule.allow)
            .unwrap_or(true)
    }

    /// Checks whether the path of `url` may be fetched
    pub fn is_allowed_url(&self, url: &Url) -> bool {
        self.is_allowed(url.path())
    }

    /// True when the rules consist of one allowing rule
    pub fn is_allow_all(&self) -> bool {
        matches!(self.rules.as_slice(), [rule] if rule.allow)
    }

    /// True when the rules consist of the single rule `("/", disallow)`
    pub fn is_allow_none(&self) -> bool {
        matches!(self.rules.as_slice(), [rule] if !rule.allow && rule.prefix == "/")
    }

    pub fn rules(&self) -> &[RobotsRule] {
        &self.rules
    }

    /// Crawl delay requested for the agent, if any
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// True when the policy could not be determined and visits should wait
    pub fn defer_visits(&self) -> bool {
        self.defer_visits
    }

    /// Number of malformed directives seen while parsing
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// The first few warning messages (at most [`MAX_WARNINGS`])
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineOutcome {
    Continue,
    Stop,
}

/// State machine for a single robots.txt parse
struct RuleParser {
    target_name: String,
    content_len: usize,
    rules: Vec<RobotsRule>,
    crawl_delay_ms: Option<u64>,
    matched_real_name: bool,
    matched_wildcard: bool,
    adding_rules: bool,
    finished_agent_fields: bool,
    warning_count: usize,
    warnings: Vec<String>,
}

impl RuleParser {
    fn new(agent_name: &str, content_len: usize) -> Self {
        Self {
            target_name: agent_name.to_lowercase(),
            content_len,
            rules: Vec::new(),
            crawl_delay_ms: None,
            matched_real_name: false,
            matched_wildcard: false,
            adding_rules: false,
            finished_agent_fields: false,
            warning_count: 0,
            warnings: Vec::new(),
        }
    }

    fn handle_line(&mut self, line: &str) -> LineOutcome {
        if let Some(agents) = line.strip_prefix(USER_AGENT_FIELD) {
            return self.handle_user_agent(agents);
        }

        if let Some(path) = line.strip_prefix(DISALLOW_FIELD) {
            self.handle_path_rule(path, false);
        } else if let Some(path) = line.strip_prefix(ALLOW_FIELD) {
            self.handle_path_rule(path, true);
        } else if let Some(value) = line.strip_prefix(CRAWL_DELAY_FIELD) {
            self.handle_crawl_delay(value);
        } else if line.starts_with(SITEMAP_FIELD)
            || line.starts_with(HOST_FIELD)
            || line.starts_with(NO_INDEX_FIELD)
            || line.starts_with(ACAP_FIELD)
        {
            // Recognized but unused
        } else if line.contains(':') {
            self.warn(format!("Unknown directive in robots.txt file: {}", line));
            self.finished_agent_fields = true;
        } else if !line.is_empty() {
            self.warn(format!(
                "Unknown line in robots.txt file (size {}): {}",
                self.content_len, line
            ));
            self.finished_agent_fields = true;
        }

        LineOutcome::Continue
    }

    fn handle_user_agent(&mut self, agents: &str) -> LineOutcome {
        if self.matched_real_name {
            if self.finished_agent_fields {
                return LineOutcome::Stop;
            }
            return LineOutcome::Continue;
        }

        if self.finished_agent_fields {
            // A new record starts
            self.finished_agent_fields = false;
            self.adding_rules = false;
        }

        for agent in agents
            .trim()
            .split([' ', '\t', ','])
            .filter(|a| !a.is_empty())
        {
            if self.target_name.contains(agent) {
                self.matched_real_name = true;
                self.adding_rules = true;
                // Drop anything collected under a wildcard record
                self.rules.clear();
                break;
            } else if agent == "*" && !self.matched_wildcard {
                self.matched_wildcard = true;
                self.adding_rules = true;
            }
        }

        LineOutcome::Continue
    }

    fn handle_path_rule(&mut self, raw_path: &str, allow: bool) {
        self.finished_agent_fields = true;
        if !self.adding_rules {
            return;
        }

        let raw_path = raw_path.trim();
        let path = match decode_path(raw_path) {
            Some(decoded) => decoded,
            None => {
                self.warn(format!(
                    "Error parsing robots rules - can't decode path: {}",
                    raw_path
                ));
                raw_path.to_string()
            }
        };

        if path.is_empty() {
            // An empty allow or disallow opens up everything
            self.rules.clear();
        } else {
            self.rules.push(RobotsRule {
                prefix: path,
                allow,
            });
        }
    }

    fn handle_crawl_delay(&mut self, value: &str) {
        self.finished_agent_fields = true;
        if !self.adding_rules {
            return;
        }

        let value = value.trim();
        if value.is_empty() {
            return;
        }

        match parse_delay_ms(value) {
            Some(ms) => self.crawl_delay_ms = Some(ms),
            None => self.warn(format!(
                "Error parsing robots rules - can't decode crawl delay: {}",
                value
            )),
        }
    }

    fn warn(&mut self, message: String) {
        self.warning_count += 1;
        if self.warnings.len() < MAX_WARNINGS {
            self.warnings.push(message);
        }
    }

    fn finish(mut self) -> RuleSet {
        if let Some(delay) = self.crawl_delay_ms {
            if delay > MAX_CRAWL_DELAY_MS {
                self.warn(format!(
                    "Crawl delay of {}ms exceeds max value - so disallowing all URLs",
                    delay
                ));
                let mut rules = RuleSet::allow_none();
                rules.warning_count = self.warning_count;
                rules.warnings = self.warnings;
                return rules;
            }
        }

        RuleSet {
            rules: self.rules,
            crawl_delay: self.crawl_delay_ms.map(Duration::from_millis),
            defer_visits: false,
            warning_count: self.warning_count,
            warnings: self.warnings,
        }
    }
}

/// Decodes a robots.txt body
///
/// A UTF-8 byte order mark switches to UTF-8; otherwise the body is read as
/// 7-bit ASCII and any other byte becomes U+FFFD.
fn decode_body(content: &[u8]) -> String {
    match content.strip_prefix(&UTF8_BOM) {
        Some(rest) => String::from_utf8_lossy(rest).into_owned(),
        None => content
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
            .collect(),
    }
}

fn decode_path(path: &str) -> Option<String> {
    urlencoding::decode(path).ok().map(|p| p.into_owned())
}

/// Converts a crawl-delay value in seconds to milliseconds
///
/// Values with a decimal point are rounded to the nearest millisecond.
fn parse_delay_ms(value: &str) -> Option<u64> {
    if value.contains('.') {
        let seconds: f64 = value.parse().ok()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Some((seconds * 1000.0).round() as u64)
    } else {
        let seconds: u32 = value.parse().ok()?;
        Some(u64::from(seconds) * 1000)
    }
}
