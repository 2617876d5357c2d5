//! Cumulative multi-section document (`all.py`).
//!
//! The document is an ordered list of `{key, body}` blocks. On disk every
//! block is introduced by a marker line `# === <section>/<variant> ===`.
//! Upserting a key removes the previous block with that key and appends the
//! new one, so the most recently rendered block is always last. Text before
//! the first marker is kept as a preamble.
//!
//! A body line that would itself parse as a marker is written with an
//! [`ESCAPE_PREFIX`] in front of it and restored on parse, so block content
//! can never open or close a block.
//!
//! [`upsert_block`] is the same operation expressed directly on the marked
//! text, line by line. Both produce identical output for documents this
//! module wrote.

use std::sync::LazyLock;

use regex::Regex;

pub const MARKER_PREFIX: &str = "# ===";

/// Prepended to body lines that look like markers.
pub const ESCAPE_PREFIX: &str = "#\\ ";

static MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^# === ([\w\-/\.]+) ===$").unwrap());

/// The marker line for a block key.
pub fn marker_line(key: &str) -> String {
    format!("{} {} ===", MARKER_PREFIX, key)
}

/// Block key of a marker line, if the line is one.
pub fn parse_marker(line: &str) -> Option<&str> {
    MARKER_REGEX
        .captures(line.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn normalize_body(body: &str) -> String {
    format!("{}\n", body.trim_end())
}

// A line needs escaping when it is a marker once every escape is removed.
fn needs_escape(line: &str) -> bool {
    let mut rest = line;
    while let Some(inner) = rest.strip_prefix(ESCAPE_PREFIX) {
        rest = inner;
    }
    parse_marker(rest).is_some()
}

fn escape_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for line in normalize_body(body).lines() {
        if needs_escape(line) {
            out.push_str(ESCAPE_PREFIX);
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn unescape_line(line: &str) -> &str {
    match line.strip_prefix(ESCAPE_PREFIX) {
        Some(inner) if needs_escape(inner) => inner,
        _ => line,
    }
}

/// Remove the block introduced by `marker` from `document`, then append
/// `marker` and `new_body` at the end.
///
/// Lines after the marker are dropped until the next marker line. Trailing
/// blank lines left by the removal are trimmed so repeated upserts reach a
/// fixed point.
pub fn upsert_block(document: &str, marker: &str, new_body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut inside = false;

    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed == marker {
            inside = true;
            continue;
        }
        if inside && parse_marker(line).is_some() {
            inside = false;
        }
        if !inside {
            kept.push(line);
        }
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    let mut out = String::new();
    for line in kept {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(marker);
    out.push('\n');
    out.push_str(&escape_body(new_body));
    out
}

/// One named, replaceable unit of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub key: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CumulativeDocument {
    preamble: String,
    blocks: Vec<Block>,
}

impl CumulativeDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse marked text. Lines before the first marker become the preamble.
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::default();
        let mut current: Option<Block> = None;

        for line in text.lines() {
            if let Some(key) = parse_marker(line) {
                if let Some(done) = current.take() {
                    doc.push_unique(done);
                }
                current = Some(Block {
                    key: key.to_string(),
                    body: String::new(),
                });
                continue;
            }
            match current.as_mut() {
                Some(block) => {
                    block.body.push_str(unescape_line(line));
                    block.body.push('\n');
                }
                None => {
                    doc.preamble.push_str(line);
                    doc.preamble.push('\n');
                }
            }
        }
        if let Some(done) = current.take() {
            doc.push_unique(done);
        }
        doc
    }

    // A hand-edited file can repeat a key; the later block wins.
    fn push_unique(&mut self, mut block: Block) {
        block.body = normalize_body(&block.body);
        self.blocks.retain(|b| b.key != block.key);
        self.blocks.push(block);
    }

    /// Replace-or-append `key`. The block always ends up last.
    pub fn upsert(&mut self, key: &str, body: &str) {
        self.push_unique(Block {
            key: key.to_string(),
            body: body.to_string(),
        });
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.key != key);
        self.blocks.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.key == key)
            .map(|b| b.body.as_str())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn keys(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.key.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.preamble.trim().is_empty()
    }

    /// Serialize to the marked-text format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let preamble = self.preamble.trim_end();
        if !preamble.is_empty() {
            out.push_str(preamble);
            out.push('\n');
        }
        for block in &self.blocks {
            out.push('\n');
            out.push_str(&marker_line(&block.key));
            out.push('\n');
            out.push_str(&escape_body(&block.body));
        }
        out
    }
}
