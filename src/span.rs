// Source position tracking for diagnostics

use std::fmt;

/// Identifies one schema source (the root file or an included file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// A byte range inside one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub source: SourceId,
}

impl Span {
    pub fn new(start: u32, end: u32, source: SourceId) -> Self {
        Self { start, end, source }
    }

    /// A span pointing nowhere, for synthesized nodes.
    pub fn dummy() -> Self {
        Self {
            start: 0,
            end: 0,
            source: SourceId(u32::MAX),
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.source == SourceId(u32::MAX)
    }

    /// Cover both spans. Spans from different sources keep the left one.
    pub fn merge(self, other: Span) -> Span {
        if self.source != other.source {
            return self;
        }
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            source: self.source,
        }
    }
}

/// Registry of schema sources, resolving spans back to file/line/column.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

#[derive(Debug)]
struct SourceFile {
    name: String,
    /// Byte offset of each line start.
    line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Register a source and return its id. Only line structure is retained.
    pub fn add(&mut self, name: impl Into<String>, content: &str) -> SourceId {
        let mut line_starts = vec![0u32];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        let id = SourceId(self.files.len() as u32);
        self.files.push(SourceFile {
            name: name.into(),
            line_starts,
        });
        id
    }

    pub fn name(&self, id: SourceId) -> &str {
        self.files
            .get(id.0 as usize)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    /// 1-based (line, column) of the span start.
    pub fn line_col(&self, span: Span) -> (u32, u32) {
        let file = match self.files.get(span.source.0 as usize) {
            Some(f) => f,
            None => return (0, 0),
        };
        let line = match file.line_starts.binary_search(&span.start) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        (line as u32 + 1, span.start - file.line_starts[line] + 1)
    }

    /// "file:line:col" rendering for error messages.
    pub fn describe(&self, span: Span) -> String {
        if span.is_dummy() {
            return String::from("<unknown>");
        }
        let (line, col) = self.line_col(span);
        format!("{}:{}:{}", self.name(span.source), line, col)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_covers_both() {
        let a = Span::new(4, 9, SourceId(0));
        let b = Span::new(7, 15, SourceId(0));
        assert_eq!(a.merge(b), Span::new(4, 15, SourceId(0)));
    }

    #[test]
    fn test_merge_cross_source_keeps_left() {
        let a = Span::new(4, 9, SourceId(0));
        let b = Span::new(0, 2, SourceId(1));
        assert_eq!(a.merge(b), a);
    }

    #[test]
    fn test_line_col() {
        let mut map = SourceMap::new();
        let id = map.add("schema.lay", "data (\n  a: uint 8\n)\n");
        assert_eq!(map.line_col(Span::new(0, 4, id)), (1, 1));
        assert_eq!(map.line_col(Span::new(9, 10, id)), (2, 3));
        assert_eq!(map.line_col(Span::new(19, 20, id)), (3, 1));
    }

    #[test]
    fn test_describe() {
        let mut map = SourceMap::new();
        let id = map.add("schema.lay", "abc\ndef");
        assert_eq!(map.describe(Span::new(4, 5, id)), "schema.lay:2:1");
        assert_eq!(map.describe(Span::dummy()), "<unknown>");
    }
}
