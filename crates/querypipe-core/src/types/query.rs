//! Query values and cache fingerprints.

use super::cursor::PageCursor;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// An immutable SQL statement plus its positional bind values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    text: String,
    params: Vec<Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// Append one positional bind value.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Scan the statement for bind placeholders, skipping string literals,
    /// quoted identifiers and comments.
    pub fn placeholders(&self) -> Placeholders {
        scan_placeholders(&self.text)
    }

    /// Derive the cache identity of this query.
    ///
    /// The identity is the normalised text plus every bound value paired with
    /// the placeholder slot it fills. Comments and whitespace runs do not
    /// contribute; swapping values between slots does.
    ///
    /// Returns `None` when no trustworthy identity exists: blank text, named
    /// placeholders, or a placeholder count that does not match the bound
    /// parameters. Callers treat `None` as "bypass the cache".
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        let text = normalize_sql(&self.text);
        if text.is_empty() {
            return None;
        }

        let placeholders = scan_placeholders(&self.text);
        if placeholders.named || placeholders.positional != self.params.len() {
            return None;
        }

        let bindings = self
            .params
            .iter()
            .enumerate()
            .map(|(slot, value)| (slot + 1, value.clone()))
            .collect();

        Some(Fingerprint::new(text, bindings))
    }

    /// Wrap this query so that it returns one page at `cursor`.
    ///
    /// The page bounds are appended as two extra positional parameters after
    /// the caller's own, so numbered and bare `?` placeholders keep working.
    pub fn paged(&self, cursor: &PageCursor) -> Query {
        let inner = self.text.trim().trim_end_matches(';').trim_end();
        let mut params = self.params.clone();
        params.push(Value::Integer(cursor.page_size() as i64));
        params.push(Value::Integer(cursor.offset() as i64));
        Query {
            // the inner text may end in a line comment
            text: format!("SELECT * FROM ({}\n) LIMIT ? OFFSET ?", inner),
            params,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}

/// Normalised identity of a query, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    text: String,
    bindings: Vec<(usize, Value)>,
    digest: u64,
}

impl Fingerprint {
    fn new(text: String, bindings: Vec<(usize, Value)>) -> Self {
        let mut buf = Vec::with_capacity(text.len() + 24 * bindings.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(0);
        for (slot, value) in &bindings {
            buf.extend_from_slice(&(*slot as u64).to_le_bytes());
            value.encode_into(&mut buf);
        }
        let digest = xxh3_64(&buf);
        Self {
            text,
            bindings,
            digest,
        }
    }

    /// Normalised statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bound values keyed by the 1-based placeholder slot they fill.
    pub fn bindings(&self) -> &[(usize, Value)] {
        &self.bindings
    }

    /// 64-bit digest, stable for the lifetime of the process.
    pub fn digest(&self) -> u64 {
        self.digest
    }

    /// Bytes used to pick a lock stripe for this fingerprint.
    pub fn stripe_key(&self) -> [u8; 8] {
        self.digest.to_le_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest)
    }
}

/// Placeholder summary of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placeholders {
    /// Number of distinct positional parameters (`?` and `?NNN`).
    pub positional: usize,
    /// Whether any named placeholder (`:name`, `@name`, `$name`) appears.
    pub named: bool,
}

fn scan_placeholders(sql: &str) -> Placeholders {
    let bytes = sql.as_bytes();
    let mut result = Placeholders::default();
    // Highest parameter number assigned so far; a bare `?` takes the next one.
    let mut highest = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote);
            }
            b'[' => {
                i = skip_until(bytes, i + 1, b"]");
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_until(bytes, i + 2, b"\n");
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_until(bytes, i + 2, b"*/");
            }
            b'?' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    let n: usize = sql[start..end].parse().unwrap_or(0);
                    highest = highest.max(n);
                } else {
                    highest += 1;
                }
                i = end;
            }
            b':' | b'@' | b'$' => {
                let is_ident = bytes
                    .get(i + 1)
                    .map(|b| b.is_ascii_alphabetic() || *b == b'_')
                    .unwrap_or(false);
                // `::` is a cast, not a parameter
                let is_cast = bytes[i] == b':'
                    && (bytes.get(i + 1) == Some(&b':') || (i > 0 && bytes[i - 1] == b':'));
                if is_ident && !is_cast {
                    result.named = true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    result.positional = highest;
    result
}

/// Skip a quoted section starting at `start`; doubled quotes are escapes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_until(bytes: &[u8], start: usize, terminator: &[u8]) -> usize {
    let mut i = start;
    while i < bytes.len() {
        if bytes[i..].starts_with(terminator) {
            return i + terminator.len();
        }
        i += 1;
    }
    bytes.len()
}

/// Drop comments and collapse whitespace runs outside literals.
///
/// A comment counts as whitespace, so `a/**/b` stays two tokens.
fn normalize_sql(sql: &str) -> String {
    let sql = sql.trim();
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
            b'[' => i = skip_until(bytes, i + 1, b"]"),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_until(bytes, i + 2, b"\n");
                pending_space = true;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_until(bytes, i + 2, b"*/");
                pending_space = true;
                continue;
            }
            b if b.is_ascii_whitespace() => {
                i += 1;
                pending_space = true;
                continue;
            }
            _ => i += sql[i..].chars().next().map_or(1, char::len_utf8),
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push_str(&sql[start..i]);
    }

    while out.ends_with(';') || out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_placeholders() {
        let q = Query::new("SELECT * FROM users WHERE age > ? AND name = ?");
        assert_eq!(q.placeholders().positional, 2);
        assert!(!q.placeholders().named);
    }

    #[test]
    fn test_numbered_placeholders() {
        let q = Query::new("SELECT * FROM t WHERE a = ?2 OR b = ?1 OR c = ?2");
        assert_eq!(q.placeholders().positional, 2);

        let q = Query::new("SELECT * FROM t WHERE a = ?3 AND b = ?");
        assert_eq!(q.placeholders().positional, 4);
    }

    #[test]
    fn test_placeholders_inside_literals_and_comments_ignored() {
        let q = Query::new(
            "SELECT '?', \"what?\" FROM t -- really?\n WHERE x = ? /* or ?2 */ AND y = 'it''s ?'",
        );
        assert_eq!(q.placeholders().positional, 1);
    }

    #[test]
    fn test_named_placeholders_detected() {
        assert!(Query::new("SELECT * FROM t WHERE id = :id").placeholders().named);
        assert!(Query::new("SELECT * FROM t WHERE id = @id").placeholders().named);
        assert!(!Query::new("SELECT '2024-01-01 10:00'").placeholders().named);
    }

    #[test]
    fn test_fingerprint_keeps_values_in_their_slots() {
        let between = "SELECT name FROM users WHERE age > ? AND age < ?";
        let a = Query::new(between).bind(25).bind(46);
        let b = Query::new(between).bind(46).bind(25);
        assert_ne!(a.fingerprint(), b.fingerprint());

        let fa = a.fingerprint().unwrap();
        assert_eq!(
            fa.bindings(),
            &[(1, Value::from(25)), (2, Value::from(46))]
        );
        assert_eq!(fa, Query::new(between).bind(25).bind(46).fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = Query::new("SELECT *\n   FROM users;");
        let b = Query::new("  SELECT * FROM users  ");
        let fa = a.fingerprint().unwrap();
        let fb = b.fingerprint().unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.text(), "SELECT * FROM users");
        assert_eq!(fa.digest(), fb.digest());
    }

    #[test]
    fn test_whitespace_inside_literals_is_significant() {
        let a = Query::new("SELECT * FROM users WHERE name = 'A  B'");
        let b = Query::new("SELECT * FROM users WHERE name = 'A B'");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_line_comment_does_not_swallow_next_line() {
        let filtered = Query::new("SELECT name FROM users -- adults\nWHERE age > 40");
        let unfiltered = Query::new("SELECT name FROM users -- adults WHERE age > 40");

        let ff = filtered.fingerprint().unwrap();
        let fu = unfiltered.fingerprint().unwrap();
        assert_ne!(ff, fu);
        assert_eq!(ff.text(), "SELECT name FROM users WHERE age > 40");
        assert_eq!(fu.text(), "SELECT name FROM users");
    }

    #[test]
    fn test_comments_do_not_change_identity() {
        let a = Query::new("SELECT /* all */ name FROM users -- everyone\n;");
        let b = Query::new("SELECT name FROM users");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Query::new("SELECT '--not a comment' FROM users");
        assert_eq!(
            c.fingerprint().unwrap().text(),
            "SELECT '--not a comment' FROM users"
        );
    }

    #[test]
    fn test_fingerprint_bypass_cases() {
        assert!(Query::new("   ").fingerprint().is_none());
        assert!(Query::new("-- nothing here").fingerprint().is_none());
        assert!(Query::new("SELECT * FROM t WHERE a = ?")
            .fingerprint()
            .is_none());
        assert!(Query::new("SELECT * FROM t WHERE a = :a")
            .bind(1)
            .fingerprint()
            .is_none());
    }

    #[test]
    fn test_paged_appends_bounds() {
        let cursor = PageCursor::starting_at(10, 5).unwrap();
        let q = Query::new("SELECT * FROM users WHERE age > ?;").bind(25);
        let paged = q.paged(&cursor);
        assert_eq!(
            paged.text(),
            "SELECT * FROM (SELECT * FROM users WHERE age > ?\n) LIMIT ? OFFSET ?"
        );
        assert_eq!(
            paged.params(),
            &[Value::from(25), Value::from(5), Value::from(10)]
        );
        assert_eq!(paged.placeholders().positional, 3);
    }

    #[test]
    fn test_paged_survives_trailing_line_comment() {
        let cursor = PageCursor::new(3).unwrap();
        let q = Query::new("SELECT name FROM users ORDER BY id -- by insertion order");
        let paged = q.paged(&cursor);
        assert!(paged.text().ends_with("\n) LIMIT ? OFFSET ?"));
        assert_eq!(paged.placeholders().positional, 2);
    }
}
