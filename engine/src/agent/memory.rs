//! Fact memory and scratch buffer
//!
//! [`Memory`] is an append-then-compress log of short facts owned by one
//! task. After every step it is compressed: error-tagged entries are dropped,
//! the most recent `window` of the rest are scanned, and the last `retain`
//! entries that look important survive in insertion order.
//!
//! [`Scratch`] holds the model's working notes, cut to the last `cap`
//! characters after every update.

/// Entries containing this tag are never retained
pub const ERROR_TAG: &str = "ERR";

/// Substrings that make an entry worth keeping: identifier prefixes,
/// directional markers and outcome keywords
const IMPORTANCE_MARKERS: &[&str] = &[
    "proj_", "emp_", "cust_", "→", "salary", "logged", "updated",
];

pub fn is_error(entry: &str) -> bool {
    entry.contains(ERROR_TAG)
}

pub fn is_important(entry: &str) -> bool {
    IMPORTANCE_MARKERS.iter().any(|m| entry.contains(m))
}

/// Compress an ordered list of memory entries.
///
/// Pure and idempotent: the output is a subsequence of the input with at most
/// `retain` entries, none of them error-tagged.
///
/// # Examples
///
/// ```
/// use ooda_engine::agent::memory::compress;
///
/// let entries: Vec<String> = vec![
///     "found proj_alpha".into(),
///     "ERR[system]: 503".into(),
///     "nothing useful".into(),
///     "emp_ana_kovac → lead".into(),
/// ];
/// let compressed = compress(&entries, 20, 12);
/// assert_eq!(compressed, vec!["found proj_alpha", "emp_ana_kovac → lead"]);
/// assert_eq!(compress(&compressed, 20, 12), compressed);
/// ```
pub fn compress(entries: &[String], window: usize, retain: usize) -> Vec<String> {
    let clean: Vec<&String> = entries.iter().filter(|e| !is_error(e)).collect();
    let start = clean.len().saturating_sub(window);
    let important: Vec<&String> = clean[start..]
        .iter()
        .copied()
        .filter(|e| is_important(e))
        .collect();
    let skip = important.len().saturating_sub(retain);
    important.into_iter().skip(skip).cloned().collect()
}

/// Bounded fact memory for one task
#[derive(Debug, Clone)]
pub struct Memory {
    entries: Vec<String>,
    window: usize,
    retain: usize,
}

impl Memory {
    pub fn new(window: usize, retain: usize) -> Self {
        Self {
            entries: Vec::new(),
            window,
            retain,
        }
    }

    /// Append one entry; blank entries are ignored
    pub fn push(&mut self, entry: impl AsRef<str>) {
        let entry = entry.as_ref().trim();
        if !entry.is_empty() {
            self.entries.push(entry.to_string());
        }
    }

    /// Append a `|`-separated delta as reported by the model
    pub fn absorb(&mut self, delta: &str) {
        for part in delta.split('|') {
            self.push(part);
        }
    }

    pub fn compress(&mut self) {
        self.entries = compress(&self.entries, self.window, self.retain);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries joined the way they are shown to the model
    pub fn render(&self) -> String {
        self.entries.join(" | ")
    }
}

/// Last `n` characters of `s`, cut on a char boundary
pub fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let start = s
        .char_indices()
        .nth(count - n)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[start..]
}

/// First `n` characters of `s`, with an ellipsis when cut
pub fn head_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let mut out: String = s.chars().take(n.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Separator placed between scratch updates
pub const SCRATCH_SEPARATOR: &str = " | ";

/// Bounded working-notes buffer
#[derive(Debug, Clone)]
pub struct Scratch {
    text: String,
    cap: usize,
}

impl Scratch {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
        }
    }

    /// Append an update and keep only the last `cap` characters
    pub fn append(&mut self, update: &str) {
        let update = update.trim();
        if update.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str(SCRATCH_SEPARATOR);
        }
        self.text.push_str(update);
        let keep = tail_chars(&self.text, self.cap).len();
        let cut = self.text.len() - keep;
        self.text.drain(..cut);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Last `n` characters, used in the Orient context
    pub fn tail(&self, n: usize) -> &str {
        tail_chars(&self.text, n)
    }
}
