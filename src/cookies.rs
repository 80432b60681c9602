//! In-memory cookie jar with a Netscape/Mozilla `cookies.txt` codec.
//!
//! The SSO helper writes its cookies in this format, and Basic sessions are
//! persisted the same way so both modes share one loader.

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, SET_COOKIE};
use url::Url;

use crate::error::SnowError;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single cookie as stored in a cookie file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    /// Domain, possibly with a leading dot.
    pub domain: String,
    /// Whether subdomains of `domain` also receive the cookie.
    pub include_subdomains: bool,
    /// Path prefix the cookie applies to.
    pub path: String,
    /// Only sent over https.
    pub secure: bool,
    /// Marked HttpOnly (curl's `#HttpOnly_` prefix).
    pub http_only: bool,
    /// Unix timestamp; 0 for a session cookie.
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
}

impl StoredCookie {
    fn bare_domain(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.bare_domain().eq_ignore_ascii_case(other.bare_domain())
    }

    fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let domain = self.bare_domain();
        let domain_ok = host.eq_ignore_ascii_case(domain)
            || (self.include_subdomains
                && host.len() > domain.len()
                && host.to_ascii_lowercase().ends_with(&format!(".{}", domain.to_ascii_lowercase())));
        let secure_ok = !self.secure || url.scheme() == "https";
        domain_ok && secure_ok && url.path().starts_with(&self.path)
    }

    fn to_line(&self) -> String {
        let domain = if self.http_only {
            format!("{}{}", HTTP_ONLY_PREFIX, self.domain)
        } else {
            self.domain.clone()
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            domain,
            netscape_bool(self.include_subdomains),
            self.path,
            netscape_bool(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }
}

/// A set of cookies belonging to one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    /// Creates an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the contents of a Netscape-format cookie file.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` on a line that does not have the expected
    /// tab-separated fields. A corrupt cookie file is never repaired.
    pub fn parse_netscape(text: &str) -> Result<Self, SnowError> {
        let mut jar = CookieJar::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_end_matches('\r');
            let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
                Some(rest) => (rest, true),
                None => (line, false),
            };
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 6 && fields.len() != 7 {
                return Err(SnowError::config(format!(
                    "malformed cookie file: line {} has {} fields, expected 7",
                    index + 1,
                    fields.len()
                )));
            }
            let expires = if fields[4].is_empty() {
                0
            } else {
                fields[4].parse::<u64>().map_err(|_| {
                    SnowError::config(format!(
                        "malformed cookie file: line {} has an invalid expiry {:?}",
                        index + 1,
                        fields[4]
                    ))
                })?
            };

            jar.insert(StoredCookie {
                domain: fields[0].to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                http_only,
                expires,
                name: fields[5].to_string(),
                value: fields.get(6).copied().unwrap_or_default().to_string(),
            });
        }
        Ok(jar)
    }

    /// Serializes the jar in Netscape format.
    pub fn to_netscape(&self) -> String {
        let mut out = String::from(NETSCAPE_HEADER);
        out.push_str("\n# This file was generated by snow-client. Do not edit.\n\n");
        for cookie in &self.cookies {
            out.push_str(&cookie.to_line());
            out.push('\n');
        }
        out
    }

    /// Inserts a cookie, replacing one with the same domain, path and name.
    pub fn insert(&mut self, cookie: StoredCookie) {
        match self.cookies.iter_mut().find(|c| c.same_slot(&cookie)) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    fn remove_slot(&mut self, cookie: &StoredCookie) {
        self.cookies.retain(|c| !c.same_slot(cookie));
    }

    /// Returns the value of the first cookie with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Returns true if every name in `names` is present in the jar.
    pub fn contains_all<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names
            .iter()
            .all(|name| self.cookies.iter().any(|c| c.name == name.as_ref()))
    }

    /// Number of cookies.
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns true if the jar holds no cookies.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Iterates over the stored cookies.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        self.cookies.iter()
    }

    /// Drops every cookie.
    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// Builds a `Cookie` request header value for `url`.
    pub fn header_value_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches_url(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Records every `Set-Cookie` header of a response received from `url`.
    ///
    /// Returns how many headers were applied. Unparseable headers are skipped.
    pub fn absorb_set_cookies(&mut self, url: &Url, headers: &HeaderMap) -> usize {
        let Some(host) = url.host_str() else {
            return 0;
        };
        let now = unix_now();
        let mut applied = 0;

        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            let parsed = match cookie::Cookie::parse(raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unparseable Set-Cookie header");
                    continue;
                }
            };

            let (domain, include_subdomains) = match parsed.domain() {
                Some(domain) => (format!(".{}", domain.trim_start_matches('.')), true),
                None => (host.to_string(), false),
            };
            let mut removal = parsed.value().is_empty();
            let expires = if let Some(max_age) = parsed.max_age() {
                let seconds = max_age.whole_seconds();
                if seconds <= 0 {
                    removal = true;
                    0
                } else {
                    now + seconds as u64
                }
            } else if let Some(at) = parsed.expires_datetime() {
                let at = at.unix_timestamp().max(0) as u64;
                if at <= now {
                    removal = true;
                }
                at
            } else {
                0
            };

            let stored = StoredCookie {
                domain,
                include_subdomains,
                path: parsed.path().unwrap_or("/").to_string(),
                secure: parsed.secure().unwrap_or(false),
                http_only: parsed.http_only().unwrap_or(false),
                expires,
                name: parsed.name().to_string(),
                value: parsed.value().to_string(),
            };
            if removal {
                self.remove_slot(&stored);
            } else {
                self.insert(stored);
            }
            applied += 1;
        }
        applied
    }
}

fn netscape_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
