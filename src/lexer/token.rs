// Token definitions for the layout language

use crate::name::Name;
use crate::span::Span;

/// One token produced by the scanner.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every token the scanner can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),

    // Identifiers
    Ident(Name),
    /// `$Name` internal variable reference
    Internal(Name),
    /// Bare `_` (the match default marker)
    Underscore,

    /// `# ...` to end of line, leading blanks stripped
    Comment(String),
    Newline,

    /// Malformed lexical form, carrying the offending fragment
    Illegal(String),
    Eof,

    // Keywords - declarations
    KwData,
    KwDeclare,
    KwDefine,
    KwBlock,
    KwEnum,
    KwPolynomial,
    KwPointpair,
    KwTypedef,
    KwAlias,
    KwInclude,

    // Keywords - statements
    KwRepeat,
    KwBreak,
    KwContinue,
    KwLet,
    KwDel,
    KwSeek,
    KwPeek,
    KwExit,
    KwMatch,
    KwIf,
    KwElse,
    KwCopy,
    KwPush,
    KwPrint,
    KwEcho,

    // Keywords - clauses
    KwWith,
    KwAs,
    KwAt,
    KwTo,

    // Keywords - endianness and types
    KwBig,
    KwLittle,
    KwInt,
    KwUint,
    KwFloat,
    KwString,
    KwBytes,
    KwTime,
    KwUnix,
    KwGps,

    // Operators
    Assign,    // =
    Eq,        // ==
    NotEq,     // !=
    Less,      // <
    LessEq,    // <=
    Greater,   // >
    GreaterEq, // >=
    AndAnd,    // &&
    OrOr,      // ||
    Not,       // !
    BitAnd,    // &
    BitOr,     // |
    Shl,       // <<
    Shr,       // >>
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Question,  // ?
    Colon,     // :

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Dot,      // .
}

impl TokenKind {
    /// Re-tag an identifier string as a keyword, if it is one.
    /// `true`/`false` become Bool literals.
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        let kind = match s {
            "data" => TokenKind::KwData,
            "declare" => TokenKind::KwDeclare,
            "define" => TokenKind::KwDefine,
            "block" => TokenKind::KwBlock,
            "enum" => TokenKind::KwEnum,
            "polynomial" => TokenKind::KwPolynomial,
            "pointpair" => TokenKind::KwPointpair,
            "typedef" => TokenKind::KwTypedef,
            "alias" => TokenKind::KwAlias,
            "include" => TokenKind::KwInclude,
            "repeat" => TokenKind::KwRepeat,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "let" => TokenKind::KwLet,
            "del" => TokenKind::KwDel,
            "seek" => TokenKind::KwSeek,
            "peek" => TokenKind::KwPeek,
            "exit" => TokenKind::KwExit,
            "match" => TokenKind::KwMatch,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "copy" => TokenKind::KwCopy,
            "push" => TokenKind::KwPush,
            "print" => TokenKind::KwPrint,
            "echo" => TokenKind::KwEcho,
            "with" => TokenKind::KwWith,
            "as" => TokenKind::KwAs,
            "at" => TokenKind::KwAt,
            "to" => TokenKind::KwTo,
            "big" => TokenKind::KwBig,
            "little" => TokenKind::KwLittle,
            "int" => TokenKind::KwInt,
            "uint" => TokenKind::KwUint,
            "float" => TokenKind::KwFloat,
            "string" => TokenKind::KwString,
            "bytes" => TokenKind::KwBytes,
            "time" => TokenKind::KwTime,
            "unix" => TokenKind::KwUnix,
            "gps" => TokenKind::KwGps,
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => return None,
        };
        Some(kind)
    }

    /// Keyword spelling, for error messages and the tree dump.
    pub fn keyword_str(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::KwData => "data",
            TokenKind::KwDeclare => "declare",
            TokenKind::KwDefine => "define",
            TokenKind::KwBlock => "block",
            TokenKind::KwEnum => "enum",
            TokenKind::KwPolynomial => "polynomial",
            TokenKind::KwPointpair => "pointpair",
            TokenKind::KwTypedef => "typedef",
            TokenKind::KwAlias => "alias",
            TokenKind::KwInclude => "include",
            TokenKind::KwRepeat => "repeat",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwLet => "let",
            TokenKind::KwDel => "del",
            TokenKind::KwSeek => "seek",
            TokenKind::KwPeek => "peek",
            TokenKind::KwExit => "exit",
            TokenKind::KwMatch => "match",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwCopy => "copy",
            TokenKind::KwPush => "push",
            TokenKind::KwPrint => "print",
            TokenKind::KwEcho => "echo",
            TokenKind::KwWith => "with",
            TokenKind::KwAs => "as",
            TokenKind::KwAt => "at",
            TokenKind::KwTo => "to",
            TokenKind::KwBig => "big",
            TokenKind::KwLittle => "little",
            TokenKind::KwInt => "int",
            TokenKind::KwUint => "uint",
            TokenKind::KwFloat => "float",
            TokenKind::KwString => "string",
            TokenKind::KwBytes => "bytes",
            TokenKind::KwTime => "time",
            TokenKind::KwUnix => "unix",
            TokenKind::KwGps => "gps",
            _ => return None,
        };
        Some(s)
    }

    pub fn is_keyword(&self) -> bool {
        self.keyword_str().is_some()
    }

    /// Identifier-like tokens: a plain identifier or a quoted string, both
    /// usable wherever the grammar asks for a name.
    pub fn is_ident_like(&self) -> bool {
        matches!(self, TokenKind::Ident(_) | TokenKind::Str(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, TokenKind::Int(_) | TokenKind::Float(_))
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(kw) = self.keyword_str() {
            return write!(f, "'{}'", kw);
        }
        match self {
            TokenKind::Int(v) => write!(f, "integer '{}'", v),
            TokenKind::Float(v) => write!(f, "float '{}'", v),
            TokenKind::Str(v) => write!(f, "string \"{}\"", v),
            TokenKind::Bool(v) => write!(f, "'{}'", v),
            TokenKind::Ident(_) => write!(f, "identifier"),
            TokenKind::Internal(_) => write!(f, "internal identifier"),
            TokenKind::Underscore => write!(f, "'_'"),
            TokenKind::Comment(_) => write!(f, "comment"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Illegal(s) => write!(f, "illegal token '{}'", s),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Assign => write!(f, "'='"),
            TokenKind::Eq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::Less => write!(f, "'<'"),
            TokenKind::LessEq => write!(f, "'<='"),
            TokenKind::Greater => write!(f, "'>'"),
            TokenKind::GreaterEq => write!(f, "'>='"),
            TokenKind::AndAnd => write!(f, "'&&'"),
            TokenKind::OrOr => write!(f, "'||'"),
            TokenKind::Not => write!(f, "'!'"),
            TokenKind::BitAnd => write!(f, "'&'"),
            TokenKind::BitOr => write!(f, "'|'"),
            TokenKind::Shl => write!(f, "'<<'"),
            TokenKind::Shr => write!(f, "'>>'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::Question => write!(f, "'?'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            _ => write!(f, "token"),
        }
    }
}
