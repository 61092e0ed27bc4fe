//! Indentation-structured `name: value` documents, as used by SFM metadata.
//!
//! ```text
//! information
//!   title: Opening
//! smp
//!   regs
//!     pc: 1234
//!   timer[0]
//! ```
//!
//! A node is addressed by a path of names joined with `:`. A name may carry
//! an `[n]` selector picking the n-th child of that name; without one the
//! last child with the name is used.

use std::fmt::Write as _;

/// One node of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BmlNode {
    name: String,
    value: Option<String>,
    children: Vec<BmlNode>,
}

impl BmlNode {
    /// A leaf without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            children: Vec::new(),
        }
    }

    /// Parse one line: everything before the first colon is the name, the
    /// rest is the value. Both are trimmed.
    fn from_line(line: &str) -> Self {
        let line = line.trim_matches(is_blank);
        match line.split_once(':') {
            Some((name, value)) => Self {
                name: name.trim_matches(is_blank).to_string(),
                value: Some(value.trim_matches(is_blank).to_string()),
                children: Vec::new(),
            },
            None => Self::new(line),
        }
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node value, if the line had a colon.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Replace the value.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    /// Child nodes in document order.
    pub fn children(&self) -> &[BmlNode] {
        &self.children
    }

    fn push_child(&mut self, child: BmlNode) -> &mut BmlNode {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    fn child(&self, segment: &Segment<'_>) -> Option<&BmlNode> {
        let mut matches = self.children.iter().filter(|c| c.name == segment.name);
        match segment.index {
            Some(index) => matches.nth(index),
            None => matches.last(),
        }
    }

    fn child_or_insert(&mut self, segment: &Segment<'_>) -> &mut BmlNode {
        let existing = self
            .children
            .iter()
            .filter(|c| c.name == segment.name)
            .count();
        let wanted = segment.index.unwrap_or(existing.saturating_sub(1));
        for _ in existing..=wanted {
            self.children.push(BmlNode::new(segment.name));
        }
        let position = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == segment.name)
            .nth(wanted)
            .map(|(i, _)| i)
            .unwrap_or(self.children.len() - 1);
        &mut self.children[position]
    }

    fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, str::is_empty) && self.children.is_empty()
    }

    fn serialize_into(&self, out: &mut String, depth: usize) {
        if depth > 0 {
            for _ in 1..depth {
                out.push_str("  ");
            }
            out.push_str(&self.name);
            if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        for child in self.children.iter().filter(|c| !c.is_empty()) {
            child.serialize_into(out, depth + 1);
            if depth == 0 {
                out.push('\n');
            }
        }
    }
}

fn is_blank(c: char) -> bool {
    c <= ' '
}

struct Segment<'a> {
    name: &'a str,
    index: Option<usize>,
}

fn segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    path.split(':').filter(|s| !s.is_empty()).map(|segment| {
        match segment.split_once('[') {
            Some((name, rest)) => {
                let digits = rest.trim_end_matches(']');
                Segment {
                    name,
                    index: Some(parse_int(digits).max(0) as usize),
                }
            }
            None => Segment {
                name: segment,
                index: None,
            },
        }
    })
}

/// Leading decimal integer of `text`, 0 if there is none. Whitespace and a
/// sign are accepted before the digits; anything after them is ignored.
pub fn parse_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as i64));
    if negative {
        -value
    } else {
        value
    }
}

/// A parsed document. The root node has no name and holds the top-level
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BmlDocument {
    root: BmlNode,
}

impl BmlDocument {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`. Deeper indentation opens the previous line; blank
    /// lines are ignored.
    pub fn parse(source: &str) -> Self {
        let mut document = Self::new();
        let mut indents: Vec<usize> = Vec::new();
        let mut last_indent: Option<usize> = None;
        let mut path: Vec<String> = Vec::new();
        let mut last_name = String::new();

        for line in source.split('\n') {
            let node = BmlNode::from_line(line);
            if node.name.is_empty() && node.value.is_none() {
                continue;
            }
            let indent = line.chars().take_while(|&c| is_blank(c)).count();
            let current = *last_indent.get_or_insert(indent);

            if indent > current {
                indents.push(current);
                last_indent = Some(indent);
                path.push(std::mem::take(&mut last_name));
            } else if indent < current {
                let mut level = current;
                while level > indent {
                    match indents.pop() {
                        Some(outer) => {
                            level = outer;
                            path.pop();
                        }
                        None => break,
                    }
                }
                last_indent = Some(indent);
            }

            last_name = node.name.clone();
            let mut parent = &mut document.root;
            for name in &path {
                parent = parent.child_or_insert(&Segment {
                    name: name.as_str(),
                    index: None,
                });
            }
            parent.push_child(node);
        }
        document
    }

    /// Top-level node.
    pub fn root(&self) -> &BmlNode {
        &self.root
    }

    /// The node at `path`, if present.
    pub fn walk_to_node(&self, path: &str) -> Option<&BmlNode> {
        segments(path).try_fold(&self.root, |node, segment| node.child(&segment))
    }

    /// The node at `path`, creating it and any missing parents.
    pub fn walk_to_node_mut(&mut self, path: &str) -> &mut BmlNode {
        let mut node = &mut self.root;
        for segment in segments(path) {
            node = node.child_or_insert(&segment);
        }
        node
    }

    /// Value at `path`.
    pub fn value_of(&self, path: &str) -> Option<&str> {
        self.walk_to_node(path).and_then(BmlNode::value)
    }

    /// Value at `path` read as a decimal integer.
    pub fn int_value(&self, path: &str) -> Option<i64> {
        self.value_of(path).map(parse_int)
    }

    /// Comma-separated integers at `path`.
    pub fn int_list(&self, path: &str) -> Option<Vec<i64>> {
        self.value_of(path)
            .map(|value| value.split(',').map(parse_int).collect())
    }

    /// Set the value at `path`, creating nodes as needed.
    pub fn set_value(&mut self, path: &str, value: impl Into<String>) {
        self.walk_to_node_mut(path).set_value(value);
    }

    /// Set an integer value at `path`.
    pub fn set_int(&mut self, path: &str, value: i64) {
        self.set_value(path, value.to_string());
    }

    /// Set a comma-separated list at `path`.
    pub fn set_list<I, T>(&mut self, path: &str, values: I)
    where
        I: IntoIterator<Item = T>,
        T: std::fmt::Display,
    {
        let mut text = String::new();
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            let _ = write!(text, "{value}");
        }
        self.set_value(path, text);
    }

    /// Render the document. Nodes without a value or children are left out
    /// and each top-level entry is followed by a blank line.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.root.serialize_into(&mut out, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "information\n  title: Opening Theme\n  game:Some Game\n\ntiming\n  length: 180000\n  fade : 8000\nsmp\n  regs\n    pc: 1234\n    a:5\n  ports: 1,2,3,4\n";

    #[test]
    fn test_parse_nested_values() {
        let doc = BmlDocument::parse(SAMPLE);
        assert_eq!(doc.value_of("information:title"), Some("Opening Theme"));
        assert_eq!(doc.value_of("information:game"), Some("Some Game"));
        assert_eq!(doc.int_value("timing:fade"), Some(8000));
        assert_eq!(doc.int_value("smp:regs:pc"), Some(1234));
        assert_eq!(doc.int_list("smp:ports"), Some(vec![1, 2, 3, 4]));
        assert_eq!(doc.value_of("smp:regs"), None);
        assert!(doc.walk_to_node("smp:regs").is_some());
        assert!(doc.walk_to_node("smp:missing").is_none());
    }

    #[test]
    fn test_dedent_returns_to_outer_level() {
        let doc = BmlDocument::parse("a\n  b\n    c: 1\n  d: 2\ne: 3\n");
        assert_eq!(doc.int_value("a:b:c"), Some(1));
        assert_eq!(doc.int_value("a:d"), Some(2));
        assert_eq!(doc.int_value("e"), Some(3));
        assert_eq!(doc.root().children().len(), 2);
    }

    #[test]
    fn test_index_selectors() {
        let doc = BmlDocument::parse("timer\n  target: 1\ntimer\n  target: 2\ntimer\n  target: 3\n");
        assert_eq!(doc.int_value("timer[0]:target"), Some(1));
        assert_eq!(doc.int_value("timer[2]:target"), Some(3));
        assert_eq!(doc.int_value("timer:target"), Some(3));
        assert_eq!(doc.int_value("timer[3]:target"), None);
    }

    #[test]
    fn test_set_value_creates_indexed_nodes() {
        let mut doc = BmlDocument::new();
        doc.set_int("smp:timer[1]:target", 7);
        doc.set_value("smp:timer[0]:target", "3");
        assert_eq!(doc.int_value("smp:timer[0]:target"), Some(3));
        assert_eq!(doc.int_value("smp:timer[1]:target"), Some(7));
        let smp = doc.walk_to_node("smp").unwrap();
        assert_eq!(smp.children().len(), 2);
    }

    #[test]
    fn test_set_value_replaces_existing() {
        let mut doc = BmlDocument::parse(SAMPLE);
        doc.set_value("information:title", "Ending");
        assert_eq!(doc.value_of("information:title"), Some("Ending"));
        assert_eq!(doc.walk_to_node("information").unwrap().children().len(), 2);
    }

    #[test]
    fn test_serialize_layout() {
        let mut doc = BmlDocument::new();
        doc.set_value("information:title", "Song");
        doc.set_value("information:empty", "");
        doc.set_int("timing:length", 1000);
        doc.set_list("smp:ports", [1u8, 2, 3, 4]);
        assert_eq!(
            doc.serialize(),
            "information\n  title:Song\n\ntiming\n  length:1000\n\nsmp\n  ports:1,2,3,4\n\n"
        );
    }

    #[test]
    fn test_serialized_document_parses_back() {
        let doc = BmlDocument::parse(SAMPLE);
        let again = BmlDocument::parse(&doc.serialize());
        assert_eq!(again.value_of("information:title"), Some("Opening Theme"));
        assert_eq!(again.int_value("smp:regs:a"), Some(5));
        assert_eq!(again.serialize(), doc.serialize());
    }

    #[test]
    fn test_parse_int_prefix() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int("  -17,3"), -17);
        assert_eq!(parse_int("12abc"), 12);
        assert_eq!(parse_int("abc"), 0);
        assert_eq!(parse_int(""), 0);
    }
}
