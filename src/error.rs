// Error types for the layout language

use crate::span::Span;
use std::fmt;

/// Parse error: lexical or syntactic. Lexical failures surface here too,
/// since the scanner emits illegal tokens rather than failing on its own.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub expected: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: None,
        }
    }

    pub fn expected(message: impl Into<String>, expected: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: Some(expected.into()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.message)?;
        if let Some(ref expected) = self.expected {
            write!(f, " (expected {})", expected)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// What kind of declaration a failed link-time lookup was after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    MissingBlock,
    MissingParameter,
    MissingPair,
    MissingConstant,
    MissingData,
    RecursiveInclude,
    BadConstant,
}

/// Resolution/merge error. Carries the referenced name so callers can
/// report which declaration was missing.
#[derive(Debug, Clone)]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub name: String,
}

impl LinkError {
    pub fn new(kind: LinkErrorKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LinkErrorKind::MissingBlock => write!(f, "{}: block not defined", self.name),
            LinkErrorKind::MissingParameter => write!(f, "{}: parameter not defined", self.name),
            LinkErrorKind::MissingPair => write!(f, "{}: pair not defined", self.name),
            LinkErrorKind::MissingConstant => write!(f, "{}: constant not defined", self.name),
            LinkErrorKind::MissingData => write!(f, "data block not found"),
            LinkErrorKind::RecursiveInclude => {
                write!(f, "{}: block includes itself without a predicate", self.name)
            }
            LinkErrorKind::BadConstant => {
                write!(f, "{}: constant value is not a literal", self.name)
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Runtime decoding error.
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub message: String,
    /// Slash-joined block path at the point of failure, filled by the
    /// decoder's run loop.
    pub path: Option<String>,
    pub span: Option<Span>,
    /// True when the input ended before the requested window; the caller
    /// can tell a truncated stream from a malformed one.
    pub is_short_read: bool,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            span: None,
            is_short_read: false,
        }
    }

    pub fn short_read(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            span: None,
            is_short_read: true,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path {
            Some(ref path) => write!(f, "{}: {}", path, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Control-flow signals raised while decoding. These are not errors: each
/// one is consumed by the construct that understands it (repeat handles
/// Break/Continue, include handles Skip, the run loop handles Done and
/// Exit). Only Error propagates to the caller.
#[derive(Debug)]
pub enum Interrupt {
    Break,
    Continue,
    Skip,
    Done,
    Exit(i64),
    Error(DecodeError),
}

impl From<DecodeError> for Interrupt {
    fn from(e: DecodeError) -> Self {
        Interrupt::Error(e)
    }
}

/// Result of one decoding step; `?` propagates both signals and errors.
pub type Exec<T> = Result<T, Interrupt>;

/// Top-level error for the engine entry points.
#[derive(Debug)]
pub enum Error {
    Parse(ParseError),
    Link(LinkError),
    Decode(DecodeError),
    /// A non-zero `exit` code surfaced out of the decoder.
    Exit(i64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "{}", e),
            Error::Link(e) => write!(f, "{}", e),
            Error::Decode(e) => write!(f, "{}", e),
            Error::Exit(code) => write!(f, "exit {}", code),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Error::Link(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn test_parse_error_display() {
        let e = ParseError::expected("unexpected token '<'", "ident", Span::dummy());
        assert_eq!(e.to_string(), "parse error: unexpected token '<' (expected ident)");
    }

    #[test]
    fn test_link_error_display() {
        let e = LinkError::new(LinkErrorKind::MissingPair, "volts");
        assert_eq!(e.to_string(), "volts: pair not defined");
    }

    #[test]
    fn test_decode_error_path_prefix() {
        let e = DecodeError::new("short buffer").with_path("/data/header");
        assert_eq!(e.to_string(), "/data/header: short buffer");
    }

    #[test]
    fn test_with_span_keeps_first() {
        let a = Span::new(1, 2, crate::span::SourceId(0));
        let b = Span::new(5, 6, crate::span::SourceId(0));
        let e = DecodeError::new("x").with_span(a).with_span(b);
        assert_eq!(e.span, Some(a));
    }
}
