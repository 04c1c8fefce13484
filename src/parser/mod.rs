// Recursive-descent parser for the layout language
//
// Statements are keyword-dispatched; the expression sub-grammar is a pratt
// parser driven by a binding-power table. Top-level `include` directives
// push new token frames, so included files are scanned lazily and consumed
// innermost-first. The grammar is line-oriented: newlines terminate field
// lines and most statements.

pub mod ast;

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::ParseError;
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::Lexer;
use crate::name::{Name, StringInterner};
use crate::span::{SourceMap, Span};
use ast::*;

/// Resolves `include` paths to schema sources. A path may name a directory,
/// in which case every file inside it is returned.
pub trait IncludeResolver {
    fn resolve(&self, path: &str) -> Result<Vec<(String, String)>, String>;
}

/// Rejects every include.
pub struct NoopResolver;

impl IncludeResolver for NoopResolver {
    fn resolve(&self, path: &str) -> Result<Vec<(String, String)>, String> {
        Err(format!("{}: includes are not available here", path))
    }
}

/// Reads includes from the filesystem.
pub struct FsResolver;

impl IncludeResolver for FsResolver {
    fn resolve(&self, path: &str) -> Result<Vec<(String, String)>, String> {
        let meta = std::fs::metadata(path).map_err(|e| format!("{}: {}", path, e))?;
        if !meta.is_dir() {
            let content = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
            return Ok(vec![(path.to_string(), content)]);
        }
        let mut names: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| format!("{}: {}", path, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        names.sort();
        let mut out = Vec::with_capacity(names.len());
        for p in names {
            let display = p.display().to_string();
            let content = std::fs::read_to_string(&p).map_err(|e| format!("{}: {}", display, e))?;
            out.push((display, content));
        }
        Ok(out)
    }
}

// Binding powers, lowest to highest. Expressions stop at `]`, newline,
// comment, `:` or end of input.
const BIND_LOWEST: u8 = 0;
const BIND_ASSIGN: u8 = 1;
const BIND_COND: u8 = 2;
const BIND_OR: u8 = 3;
const BIND_AND: u8 = 4;
const BIND_BITOR: u8 = 5;
const BIND_BITAND: u8 = 6;
const BIND_EQ: u8 = 7;
const BIND_REL: u8 = 8;
const BIND_SHIFT: u8 = 9;
const BIND_SUM: u8 = 10;
const BIND_MUL: u8 = 11;
const BIND_UNARY: u8 = 12;

fn bind_power(kind: &TokenKind) -> u8 {
    match kind {
        TokenKind::Assign => BIND_ASSIGN,
        TokenKind::Question => BIND_COND,
        TokenKind::OrOr => BIND_OR,
        TokenKind::AndAnd => BIND_AND,
        TokenKind::BitOr => BIND_BITOR,
        TokenKind::BitAnd => BIND_BITAND,
        TokenKind::Eq | TokenKind::NotEq => BIND_EQ,
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => BIND_REL,
        TokenKind::Shl | TokenKind::Shr => BIND_SHIFT,
        TokenKind::Plus | TokenKind::Minus => BIND_SUM,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => BIND_MUL,
        _ => BIND_LOWEST,
    }
}

fn binop_of(kind: &TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Rem,
        TokenKind::AndAnd => BinOp::And,
        TokenKind::OrOr => BinOp::Or,
        TokenKind::BitAnd => BinOp::BitAnd,
        TokenKind::BitOr => BinOp::BitOr,
        TokenKind::Shl => BinOp::Shl,
        TokenKind::Shr => BinOp::Shr,
        TokenKind::Eq => BinOp::Eq,
        TokenKind::NotEq => BinOp::Ne,
        TokenKind::Less => BinOp::Lt,
        TokenKind::LessEq => BinOp::Le,
        TokenKind::Greater => BinOp::Gt,
        TokenKind::GreaterEq => BinOp::Ge,
        _ => return None,
    };
    Some(op)
}

fn is_relational_token(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq
    )
}

#[derive(Debug, Clone, Default)]
struct Typedef {
    kind: Option<ParamKind>,
    size: Option<u32>,
    endian: Option<Endianness>,
}

struct Frame {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
}

impl Frame {
    fn next(&mut self) -> Token {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                t.clone()
            }
            None => Token::new(TokenKind::Eof, Span::dummy()),
        }
    }
}

pub struct Parser<'a> {
    frames: Vec<Frame>,
    curr: Token,
    peek: Token,
    typedefs: FxHashMap<Name, Typedef>,
    contexts: Vec<&'static str>,
    inline: u32,
    in_data: bool,
    resolver: &'a dyn IncludeResolver,
    interner: &'a mut StringInterner,
    sources: &'a mut SourceMap,
}

/// Parse one schema source into a declaration tree. Included files are
/// pulled in through `resolver`.
pub fn parse_source(
    source: &str,
    file: &str,
    resolver: &dyn IncludeResolver,
    interner: &mut StringInterner,
    sources: &mut SourceMap,
) -> Result<Ast, ParseError> {
    let mut parser = Parser {
        frames: Vec::new(),
        curr: Token::new(TokenKind::Eof, Span::dummy()),
        peek: Token::new(TokenKind::Eof, Span::dummy()),
        typedefs: FxHashMap::default(),
        contexts: Vec::new(),
        inline: 0,
        in_data: false,
        resolver,
        interner,
        sources,
    };
    parser.push_source(file, source);
    parser.bump();
    parser.bump();
    parser.parse()
}

impl<'a> Parser<'a> {
    // ========== Token plumbing ==========

    fn push_source(&mut self, name: &str, content: &str) {
        let content = content.replace("\r\n", "\n");
        let sid = self.sources.add(name, &content);
        let tokens = Lexer::new(&content, sid, self.interner).tokenize();
        self.frames.push(Frame {
            tokens,
            pos: 0,
            file: name.to_string(),
        });
    }

    fn next_raw(&mut self) -> Token {
        loop {
            match self.frames.last_mut() {
                None => return Token::new(TokenKind::Eof, Span::dummy()),
                Some(frame) => {
                    let tok = frame.next();
                    if matches!(tok.kind, TokenKind::Eof) && self.frames.len() > 1 {
                        self.frames.pop();
                        continue;
                    }
                    return tok;
                }
            }
        }
    }

    fn bump(&mut self) {
        let next = self.next_raw();
        self.curr = std::mem::replace(&mut self.peek, next);
    }

    fn is_done(&self) -> bool {
        matches!(self.curr.kind, TokenKind::Eof)
    }

    fn skip_comments(&mut self) {
        while matches!(self.curr.kind, TokenKind::Newline | TokenKind::Comment(_)) {
            self.bump();
        }
    }

    /// Identifier-like (plain identifier or quoted string) as a Name.
    fn take_ident(&mut self) -> Option<Name> {
        match self.curr.kind.clone() {
            TokenKind::Ident(n) => Some(n),
            TokenKind::Str(s) => Some(self.interner.intern(&s)),
            _ => None,
        }
    }

    fn expect_ident(&mut self) -> Result<Name, ParseError> {
        self.take_ident().ok_or_else(|| self.err_expected("ident"))
    }

    fn expect_kind(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if std::mem::discriminant(&self.curr.kind) == std::mem::discriminant(kind) {
            Ok(())
        } else {
            Err(self.err_expected(what))
        }
    }

    /// Blocks and pairs close on `)`.
    fn is_closed(&mut self) -> Result<(), ParseError> {
        self.expect_kind(&TokenKind::RParen, ")")?;
        self.bump();
        Ok(())
    }

    fn in_ctx<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.contexts.push(name);
        let out = f(self);
        self.contexts.pop();
        out
    }

    fn in_context(&self, name: &str) -> bool {
        self.contexts.iter().rev().any(|c| *c == name)
    }

    fn context_name(&self) -> &'static str {
        self.contexts.last().copied().unwrap_or("schema")
    }

    fn current_file(&self) -> &str {
        self.frames
            .last()
            .map(|f| f.file.as_str())
            .unwrap_or("<input>")
    }

    fn err_unexpected(&self) -> ParseError {
        ParseError::new(
            format!(
                "({}) {}({}): unexpected {}",
                self.sources.describe(self.curr.span),
                self.context_name(),
                self.current_file(),
                self.curr.kind
            ),
            self.curr.span,
        )
    }

    fn err_expected(&self, want: &str) -> ParseError {
        ParseError::expected(
            format!(
                "({}) {}({}): got {}",
                self.sources.describe(self.curr.span),
                self.context_name(),
                self.current_file(),
                self.curr.kind
            ),
            want,
            self.curr.span,
        )
    }

    fn err_message(&self, message: String) -> ParseError {
        ParseError::new(
            format!(
                "({}) {}({}): {}",
                self.sources.describe(self.curr.span),
                self.context_name(),
                self.current_file(),
                message
            ),
            self.curr.span,
        )
    }

    // ========== Top level ==========

    fn parse(mut self) -> Result<Ast, ParseError> {
        let mut out = Ast::default();
        loop {
            self.skip_comments();
            if self.is_done() {
                break;
            }
            match self.curr.kind {
                TokenKind::KwInclude => {
                    self.in_ctx("include", |p| p.parse_include_directive())?;
                }
                TokenKind::KwData => {
                    let data = self.in_ctx("data", |p| p.parse_data())?;
                    if out.data.is_some() {
                        return Err(self.err_message("data block already defined".into()));
                    }
                    out.data = Some(data);
                }
                TokenKind::KwBlock => {
                    let block = self.in_ctx("block", |p| p.parse_block_decl())?;
                    out.blocks.push(block);
                }
                TokenKind::KwEnum | TokenKind::KwPolynomial | TokenKind::KwPointpair => {
                    let pair = self.in_ctx("pair", |p| p.parse_pair(false))?;
                    out.pairs.push(pair);
                }
                TokenKind::KwDeclare => {
                    self.in_ctx("declare", |p| p.parse_declare(&mut out.declares))?;
                }
                TokenKind::KwDefine => {
                    self.in_ctx("define", |p| p.parse_define(&mut out.defines))?;
                }
                TokenKind::KwTypedef => {
                    self.in_ctx("typedef", |p| p.parse_typedef())?;
                }
                TokenKind::KwAlias => {
                    let alias = self.in_ctx("alias", |p| p.parse_alias())?;
                    out.aliases.push(alias);
                }
                _ => return Err(self.err_unexpected()),
            }
        }
        Ok(out)
    }

    fn parse_include_directive(&mut self) -> Result<(), ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();
        let mut paths = Vec::new();
        loop {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) || self.is_done() {
                break;
            }
            let name = self.expect_ident()?;
            paths.push(self.interner.resolve(name).to_string());
            self.bump();
            if !matches!(
                self.curr.kind,
                TokenKind::Newline | TokenKind::Comment(_) | TokenKind::RParen
            ) {
                return Err(self.err_unexpected());
            }
        }
        self.expect_kind(&TokenKind::RParen, ")")?;
        // Push the new frames before advancing: `peek` already holds the
        // newline after `)`, and the token after that must come from the
        // included sources. Paths are pushed in reverse so the first one
        // listed is consumed first.
        let mut sources = Vec::new();
        for path in &paths {
            let files = self
                .resolver
                .resolve(path)
                .map_err(|e| self.err_message(format!("include: {}", e)))?;
            sources.extend(files);
        }
        for (name, content) in sources.iter().rev() {
            debug!(file = %name, "including schema source");
            self.push_source(name, content);
        }
        self.bump();
        Ok(())
    }

    fn parse_data(&mut self) -> Result<Data, ParseError> {
        let span = self.curr.span;
        let name = self.interner.intern("data");
        self.bump();

        let mut block = Block::new(name, span);
        if matches!(self.curr.kind, TokenKind::Less) {
            let (pre, post) = self.parse_diamond()?;
            block.pre = pre.map(Box::new);
            block.post = post.map(Box::new);
        }

        let mut files = Vec::new();
        while !matches!(self.curr.kind, TokenKind::LParen) {
            let name = self.expect_ident()?;
            files.push(self.interner.resolve(name).to_string());
            self.bump();
        }

        self.in_data = true;
        let nodes = self.parse_statements();
        self.in_data = false;
        block.nodes = nodes?;
        Ok(Data { block, files })
    }

    fn parse_block_decl(&mut self) -> Result<Block, ParseError> {
        self.bump();
        let span = self.curr.span;
        let name = self.expect_ident()?;
        self.bump();

        let mut block = Block::new(name, span);
        if matches!(self.curr.kind, TokenKind::Less) {
            let (pre, post) = self.parse_diamond()?;
            block.pre = pre.map(Box::new);
            block.post = post.map(Box::new);
        }
        block.nodes = self.parse_statements()?;
        Ok(block)
    }

    /// `<pre, post>` hook references on data/block headers. Either side may
    /// be empty: `<, teardown>`, `<setup,...>` or `<>`.
    fn parse_diamond(&mut self) -> Result<(Option<Node>, Option<Node>), ParseError> {
        let mut pre = None;
        let mut post = None;
        self.bump();
        match self.curr.kind.clone() {
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                let span = self.curr.span;
                let target = self.expect_ident()?;
                pre = Some(Node::Reference(Reference {
                    target,
                    alias: Some(target),
                    span,
                }));
                self.bump();
                if !matches!(self.curr.kind, TokenKind::Comma) {
                    return Err(self.err_expected("comma"));
                }
                post = self.parse_diamond_post()?;
            }
            TokenKind::Comma => {
                post = self.parse_diamond_post()?;
            }
            TokenKind::Greater => {}
            _ => return Err(self.err_unexpected()),
        }
        if !matches!(self.curr.kind, TokenKind::Greater) {
            return Err(self.err_expected(">"));
        }
        self.bump();
        Ok((pre, post))
    }

    fn parse_diamond_post(&mut self) -> Result<Option<Node>, ParseError> {
        self.bump();
        if matches!(self.curr.kind, TokenKind::Greater) {
            return Ok(None);
        }
        let span = self.curr.span;
        let target = self.expect_ident()?;
        self.bump();
        Ok(Some(Node::Reference(Reference {
            target,
            alias: Some(target),
            span,
        })))
    }

    // ========== Statements ==========

    fn parse_statements(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();

        let mut nodes = Vec::new();
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            let node = match self.curr.kind.clone() {
                TokenKind::KwInclude => Some(self.in_ctx("include", |p| p.parse_include_stmt())?),
                TokenKind::KwLet => Some(self.in_ctx("let", |p| p.parse_let())?),
                TokenKind::KwDel => Some(self.in_ctx("del", |p| p.parse_del())?),
                TokenKind::KwSeek => Some(self.in_ctx("seek", |p| p.parse_seek())?),
                TokenKind::KwPeek => Some(self.in_ctx("peek", |p| p.parse_peek())?),
                TokenKind::KwRepeat => Some(self.in_ctx("repeat", |p| p.parse_repeat())?),
                TokenKind::KwExit => Some(self.in_ctx("exit", |p| p.parse_exit())?),
                TokenKind::KwMatch => Some(self.in_ctx("match", |p| p.parse_match())?),
                TokenKind::KwBreak => Some(self.in_ctx("break", |p| p.parse_break())?),
                TokenKind::KwContinue => Some(self.in_ctx("continue", |p| p.parse_continue())?),
                TokenKind::KwPrint => Some(self.in_ctx("print", |p| p.parse_print())?),
                TokenKind::KwEcho => Some(self.in_ctx("echo", |p| p.parse_echo())?),
                TokenKind::KwIf => Some(self.in_ctx("if", |p| p.parse_if())?),
                TokenKind::KwCopy => Some(self.in_ctx("copy", |p| p.parse_copy())?),
                TokenKind::KwPush => {
                    self.in_ctx("push", |p| p.parse_push())?;
                    None
                }
                TokenKind::Ident(_) | TokenKind::Str(_) => Some(self.parse_field()?),
                TokenKind::LParen => {
                    let span = self.curr.span;
                    let stmts = self.parse_statements()?;
                    let (name, _) = self.parse_block_id()?;
                    let mut block = Block::new(name, span);
                    block.nodes = stmts;
                    Some(Node::Block(Rc::new(block)))
                }
                _ => return Err(self.err_unexpected()),
            };
            if let Some(node) = node {
                nodes.push(node);
            }
        }
        self.is_closed()?;
        Ok(nodes)
    }

    /// Trailing `as <name>` on an inline block or pair; otherwise a fresh
    /// `inline-<N>` name, guaranteed unique within this parse.
    fn parse_block_id(&mut self) -> Result<(Name, bool), ParseError> {
        if matches!(self.curr.kind, TokenKind::KwAs) {
            self.bump();
            let name = self.expect_ident()?;
            self.bump();
            Ok((name, true))
        } else {
            let name = self.interner.intern(&format!("inline-{}", self.inline));
            self.inline += 1;
            Ok((name, false))
        }
    }

    fn parse_field(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        let name = self.expect_ident()?;
        self.bump();

        let mut node = match self.curr.kind {
            TokenKind::Newline => Node::Reference(Reference {
                target: name,
                alias: None,
                span,
            }),
            TokenKind::Colon => Node::Param(self.parse_field_short(name, span)?),
            TokenKind::KwAs | TokenKind::KwWith => {
                if !self.in_data {
                    return Err(
                        self.err_message("long field form is only allowed inside data".into())
                    );
                }
                Node::Param(self.parse_field_long(name, span)?)
            }
            _ => return Err(self.err_unexpected()),
        };

        if let Node::Param(ref mut param) = node {
            if matches!(self.curr.kind, TokenKind::Comma) {
                self.bump();
                match self.curr.kind {
                    TokenKind::Ident(_) | TokenKind::Str(_) => {
                        let pair = self.expect_ident()?;
                        param.apply = Some(Apply::Named(pair));
                        self.bump();
                    }
                    TokenKind::KwEnum | TokenKind::KwPolynomial | TokenKind::KwPointpair => {
                        let pair = self.parse_pair(true)?;
                        param.apply = Some(Apply::Pair(Rc::new(pair)));
                    }
                    _ => return Err(self.err_expected("ident")),
                }
            }
            if matches!(self.curr.kind, TokenKind::Eq) {
                self.bump();
                param.expect = Some(self.parse_predicate()?);
            }
        }
        if !matches!(self.curr.kind, TokenKind::Newline | TokenKind::RParen) {
            return Err(self.err_expected("newline"));
        }
        Ok(node)
    }

    fn parse_field_short(&mut self, name: Name, span: Span) -> Result<Parameter, ParseError> {
        self.bump();
        let mut kind = None;
        let mut size = None;
        let mut endian = None;

        match self.curr.kind {
            TokenKind::KwInt => {
                kind = Some(ParamKind::Int);
                self.bump();
            }
            TokenKind::KwUint => {
                kind = Some(ParamKind::Uint);
                self.bump();
            }
            TokenKind::KwFloat => {
                kind = Some(ParamKind::Float);
                self.bump();
            }
            TokenKind::KwString => {
                kind = Some(ParamKind::Str);
                self.bump();
            }
            TokenKind::KwBytes => {
                kind = Some(ParamKind::Bytes);
                self.bump();
            }
            TokenKind::KwTime => {
                kind = Some(self.parse_time_kind()?);
                self.bump();
            }
            TokenKind::Ident(n) => {
                let td = self
                    .typedefs
                    .get(&n)
                    .cloned()
                    .ok_or_else(|| self.err_unexpected())?;
                self.bump();
                return Ok(Parameter {
                    name,
                    kind: td.kind.unwrap_or(ParamKind::Uint),
                    size: td.size.map(SizeSpec::Bits),
                    endian: td.endian.unwrap_or(Endianness::Big),
                    apply: None,
                    expect: None,
                    span,
                });
            }
            _ => {}
        }

        if let TokenKind::Int(v) = self.curr.kind {
            size = Some(self.size_bits(v)?);
            self.bump();
        }
        match self.curr.kind {
            TokenKind::KwBig => {
                endian = Some(Endianness::Big);
                self.bump();
            }
            TokenKind::KwLittle => {
                endian = Some(Endianness::Little);
                self.bump();
            }
            _ => {}
        }
        if kind.is_none() && size.is_none() {
            return Err(self.err_message("field: type and length not set".into()));
        }
        Ok(Parameter {
            name,
            kind: kind.unwrap_or(ParamKind::Uint),
            size: size.map(SizeSpec::Bits),
            endian: endian.unwrap_or(Endianness::Big),
            apply: None,
            expect: None,
            span,
        })
    }

    /// `time(unix)` / `time(gps)`; curr is on `time` when called.
    fn parse_time_kind(&mut self) -> Result<ParamKind, ParseError> {
        if !matches!(self.peek.kind, TokenKind::LParen) {
            return Err(self.err_expected("( after time"));
        }
        self.bump();
        self.bump();
        let kind = match self.curr.kind {
            TokenKind::KwUnix => ParamKind::TimeUnix,
            TokenKind::KwGps => ParamKind::TimeGps,
            _ => return Err(self.err_unexpected()),
        };
        self.bump();
        self.expect_kind(&TokenKind::RParen, ")")?;
        Ok(kind)
    }

    fn parse_field_long(&mut self, name: Name, span: Span) -> Result<Parameter, ParseError> {
        let mut kind = None;
        if matches!(self.curr.kind, TokenKind::KwAs) {
            self.bump();
            kind = match self.curr.kind {
                TokenKind::KwInt => Some(ParamKind::Int),
                TokenKind::KwUint => Some(ParamKind::Uint),
                TokenKind::KwFloat => Some(ParamKind::Float),
                TokenKind::KwString => Some(ParamKind::Str),
                TokenKind::KwBytes => Some(ParamKind::Bytes),
                _ => return Err(self.err_unexpected()),
            };
            self.bump();
        }
        if !matches!(self.curr.kind, TokenKind::KwWith) {
            return Err(self.err_expected("with"));
        }
        self.bump();
        let size = match self.curr.kind.clone() {
            TokenKind::Int(v) => SizeSpec::Bits(self.size_bits(v)?),
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                let n = self.expect_ident()?;
                SizeSpec::Field(n)
            }
            _ => return Err(self.err_expected("ident/number")),
        };
        self.bump();
        Ok(Parameter {
            name,
            kind: kind.unwrap_or(ParamKind::Uint),
            size: Some(size),
            endian: Endianness::Big,
            apply: None,
            expect: None,
            span,
        })
    }

    fn size_bits(&self, v: i64) -> Result<u32, ParseError> {
        if v <= 0 || v > u32::MAX as i64 {
            return Err(self.err_message(format!("field: invalid size {}", v)));
        }
        Ok(v as u32)
    }

    fn parse_include_stmt(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let mut predicate = None;
        if matches!(self.curr.kind, TokenKind::LBracket) {
            self.bump();
            predicate = Some(self.parse_predicate()?);
        }
        let target = match self.curr.kind {
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                IncludeTarget::Named(self.parse_reference()?)
            }
            TokenKind::LParen => {
                let body_span = self.curr.span;
                let stmts = self.parse_statements()?;
                let (name, _) = self.parse_block_id()?;
                let mut block = Block::new(name, body_span);
                block.nodes = stmts;
                IncludeTarget::Inline(Rc::new(block))
            }
            _ => return Err(self.err_unexpected()),
        };
        self.bump();
        Ok(Node::Include(Box::new(Include {
            predicate,
            target,
            span,
        })))
    }

    fn parse_reference(&mut self) -> Result<Reference, ParseError> {
        let span = self.curr.span;
        let target = self.expect_ident()?;
        let mut alias = None;
        if matches!(self.peek.kind, TokenKind::KwAs) {
            self.bump();
            self.bump();
            alias = Some(self.expect_ident()?);
        }
        self.bump();
        Ok(Reference {
            target,
            alias,
            span,
        })
    }

    /// If/match/repeat bodies: either a parenthesized inline block or a
    /// reference to a named block.
    fn parse_body(&mut self) -> Result<Node, ParseError> {
        match self.curr.kind {
            TokenKind::LParen => {
                let span = self.curr.span;
                let stmts = self.parse_statements()?;
                let (name, _) = self.parse_block_id()?;
                let mut block = Block::new(name, span);
                block.nodes = stmts;
                Ok(Node::Block(Rc::new(block)))
            }
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                Ok(Node::Reference(self.parse_reference()?))
            }
            _ => Err(self.err_unexpected()),
        }
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let cond = self.parse_predicate()?;
        let then = self.parse_body()?;

        let mut otherwise = None;
        if matches!(self.curr.kind, TokenKind::KwElse) {
            self.bump();
            otherwise = Some(if matches!(self.curr.kind, TokenKind::KwIf) {
                self.parse_if()?
            } else {
                self.parse_body()?
            });
        }
        Ok(Node::If(Box::new(IfNode {
            cond,
            then,
            otherwise,
        })))
    }

    fn parse_repeat(&mut self) -> Result<Node, ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let count = self.parse_predicate()?;
        let body = self.parse_body()?;
        Ok(Node::Repeat(Box::new(RepeatNode { count, body })))
    }

    fn parse_break(&mut self) -> Result<Node, ParseError> {
        if !self.in_context("repeat") {
            return Err(self.err_message("break: unexpected outside of repeat block".into()));
        }
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let expr = self.parse_predicate()?;
        self.expect_kind(&TokenKind::Newline, "newline")?;
        self.bump();
        Ok(Node::Break(expr))
    }

    fn parse_continue(&mut self) -> Result<Node, ParseError> {
        if !self.in_context("repeat") {
            return Err(self.err_message("continue: unexpected outside of repeat block".into()));
        }
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let expr = self.parse_predicate()?;
        self.expect_kind(&TokenKind::Newline, "newline")?;
        self.bump();
        Ok(Node::Continue(expr))
    }

    fn parse_seek(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let mut absolute = false;
        if matches!(self.curr.kind, TokenKind::KwAt) {
            absolute = true;
            self.bump();
        }
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let offset = self.parse_predicate()?;
        self.bump();
        Ok(Node::Seek(SeekNode {
            offset,
            absolute,
            span,
        }))
    }

    fn parse_peek(&mut self) -> Result<Node, ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let count = self.parse_predicate()?;
        self.bump();
        Ok(Node::Peek(count))
    }

    fn parse_let(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let name = self.expect_ident()?;
        self.bump();
        self.expect_kind(&TokenKind::Assign, "=")?;
        self.bump();
        let value = self.parse_predicate()?;
        Ok(Node::Let(LetNode { name, value, span }))
    }

    fn parse_del(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        let mut names = Vec::new();
        loop {
            self.bump();
            if matches!(self.curr.kind, TokenKind::Newline) || self.is_done() {
                break;
            }
            names.push(self.expect_ident()?);
        }
        Ok(Node::Del(DelNode { names, span }))
    }

    fn parse_exit(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let code = match self.curr.kind {
            TokenKind::Int(v) => ExitCode::Code(v),
            TokenKind::Ident(n) => ExitCode::Field(n),
            _ => return Err(self.err_expected("integer")),
        };
        if !matches!(self.peek.kind, TokenKind::Newline | TokenKind::Eof) {
            return Err(self.err_unexpected());
        }
        self.bump();
        Ok(Node::Exit(ExitNode { code, span }))
    }

    fn parse_match(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();

        let mut subject = None;
        if self.curr.kind.is_ident_like() {
            let subj_span = self.curr.span;
            let n = self.expect_ident()?;
            subject = Some(Expr {
                kind: ExprKind::Ident(n),
                span: subj_span,
            });
            self.bump();
        }

        if !matches!(self.curr.kind, TokenKind::KwWith) {
            return Err(self.err_expected("with"));
        }
        self.bump();
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();

        let with_subject = subject.is_some();
        let mut cases = Vec::new();
        let mut default = None;
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            let (conds, is_default, body) = self.parse_match_case(!with_subject)?;
            if is_default {
                if default.is_some() {
                    return Err(self.err_message("match: default case already set".into()));
                }
                default = Some(body);
            } else {
                cases.push(MatchCase { conds, body });
            }
        }
        self.is_closed()?;
        Ok(Node::Match(Box::new(MatchNode {
            subject,
            cases,
            default,
            span,
        })))
    }

    fn parse_match_case(&mut self, nocomma: bool) -> Result<(Vec<Expr>, bool, Node), ParseError> {
        let mut conds = Vec::new();
        let mut is_default = false;
        while !self.is_done() {
            if matches!(self.curr.kind, TokenKind::Colon) {
                break;
            }
            if matches!(self.curr.kind, TokenKind::Underscore) {
                if !conds.is_empty() {
                    return Err(self.err_message("match: default case should be alone".into()));
                }
                is_default = true;
                self.bump();
                break;
            }
            conds.push(self.parse_predicate()?);
            self.bump();
            if matches!(self.curr.kind, TokenKind::Comma) {
                if nocomma {
                    return Err(self.err_unexpected());
                }
                self.bump();
            }
        }

        self.expect_kind(&TokenKind::Colon, ":")?;
        self.bump();

        let body = match self.curr.kind {
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                let node = Node::Reference(self.parse_reference()?);
                self.bump();
                node
            }
            TokenKind::LParen => {
                let span = self.curr.span;
                let stmts = self.parse_statements()?;
                let (name, _) = self.parse_block_id()?;
                let mut block = Block::new(name, span);
                block.nodes = stmts;
                Node::Block(Rc::new(block))
            }
            _ => return Err(self.err_unexpected()),
        };
        Ok((conds, is_default, body))
    }

    fn parse_print(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let mut node = PrintNode {
            dest: Dest::Standard,
            format: Format::Csv,
            method: Method::Debug,
            predicate: None,
            values: Vec::new(),
            span,
        };

        if let TokenKind::Ident(n) = self.curr.kind {
            node.method = match self.interner.resolve(n) {
                "raw" => Method::Raw,
                "eng" => Method::Eng,
                "both" => Method::Both,
                "debug" => Method::Debug,
                _ => return Err(self.err_unexpected()),
            };
            self.bump();
        }

        if matches!(self.curr.kind, TokenKind::KwTo) {
            self.bump();
            node.dest = self.parse_dest()?;
            self.bump();
        }
        if matches!(self.curr.kind, TokenKind::KwAs) {
            self.bump();
            node.format = match self.curr.kind {
                TokenKind::Ident(n) => match self.interner.resolve(n) {
                    "csv" => Format::Csv,
                    "sexp" | "tuple" => Format::Sexp,
                    other => {
                        return Err(self.err_message(format!("print: unknown format {}", other)))
                    }
                },
                _ => return Err(self.err_expected("ident")),
            };
            self.bump();
        }
        if matches!(self.curr.kind, TokenKind::KwWith) {
            self.bump();
            while !self.is_done() {
                if matches!(self.curr.kind, TokenKind::Newline | TokenKind::Comment(_))
                    || self.curr.kind.is_keyword()
                {
                    break;
                }
                match self.curr.kind {
                    TokenKind::Ident(n) => node.values.push(n),
                    _ => return Err(self.err_expected("ident")),
                }
                self.bump();
            }
        }
        if matches!(self.curr.kind, TokenKind::KwIf) {
            self.bump();
            node.predicate = Some(self.parse_predicate()?);
        }
        if !matches!(
            self.curr.kind,
            TokenKind::Newline | TokenKind::Comment(_) | TokenKind::RParen
        ) {
            return Err(self.err_unexpected());
        }
        Ok(Node::Print(Box::new(node)))
    }

    /// `to` destination: quoted string is a literal path, identifier is
    /// resolved against the environment at execution time.
    fn parse_dest(&mut self) -> Result<Dest, ParseError> {
        match self.curr.kind.clone() {
            TokenKind::Str(s) => Ok(Dest::Path(s)),
            TokenKind::Ident(n) => Ok(Dest::Field(n)),
            _ => Err(self.err_expected("ident")),
        }
    }

    fn parse_echo(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        let parts = match self.curr.kind.clone() {
            TokenKind::Str(s) => self.parse_echo_template(&s)?,
            _ => return Err(self.err_expected("string")),
        };
        self.bump();
        Ok(Node::Echo(Box::new(EchoNode {
            dest: Dest::Standard,
            parts,
            span,
        })))
    }

    /// Expand `%[<expr>]` placeholders. Sub-expressions run through the
    /// same pratt grammar on a string-backed token stream.
    fn parse_echo_template(&mut self, text: &str) -> Result<Vec<EchoPart>, ParseError> {
        let bytes = text.as_bytes();
        let mut parts = Vec::new();
        let mut lit_start = 0;
        let mut scan = 0;
        while let Some(off) = memchr::memchr(b'[', &bytes[scan..]) {
            let open = scan + off;
            if open == 0 || bytes[open - 1] != b'%' {
                scan = open + 1;
                continue;
            }
            if open - 1 > lit_start {
                parts.push(EchoPart::Lit(text[lit_start..open - 1].to_string()));
            }
            let close = match memchr::memchr(b']', &bytes[open + 1..]) {
                Some(k) => open + 1 + k,
                None => {
                    return Err(
                        self.err_message(format!("echo: expression not closed {}", text))
                    )
                }
            };
            if close == open + 1 {
                return Err(self.err_message(format!("echo: empty expression {}", text)));
            }
            let expr = self.parse_template_expr(&text[open + 1..close])?;
            parts.push(EchoPart::Expr(expr));
            lit_start = close + 1;
            scan = lit_start;
        }
        if lit_start < text.len() {
            parts.push(EchoPart::Lit(text[lit_start..].to_string()));
        }
        Ok(parts)
    }

    fn parse_template_expr(&mut self, text: &str) -> Result<Expr, ParseError> {
        let sid = self.sources.add("<echo>", text);
        let tokens = Lexer::new(text, sid, self.interner).tokenize();
        let mut sub = Parser {
            frames: vec![Frame {
                tokens,
                pos: 0,
                file: "<echo>".to_string(),
            }],
            curr: Token::new(TokenKind::Eof, Span::dummy()),
            peek: Token::new(TokenKind::Eof, Span::dummy()),
            typedefs: FxHashMap::default(),
            contexts: vec!["echo"],
            inline: 0,
            in_data: false,
            resolver: self.resolver,
            interner: &mut *self.interner,
            sources: &mut *self.sources,
        };
        sub.bump();
        sub.bump();
        sub.parse_expression(BIND_LOWEST)
    }

    fn parse_copy(&mut self) -> Result<Node, ParseError> {
        let span = self.curr.span;
        self.bump();
        self.expect_kind(&TokenKind::LBracket, "[")?;
        self.bump();
        let count = self.parse_predicate()?;

        let mut node = CopyNode {
            count,
            dest: Dest::Standard,
            format: CopyFormat::Bytes,
            predicate: None,
            span,
        };
        if matches!(self.curr.kind, TokenKind::KwTo) {
            self.bump();
            node.dest = self.parse_dest()?;
            self.bump();
        }
        if matches!(self.curr.kind, TokenKind::KwAs) {
            self.bump();
            node.format = match self.curr.kind {
                TokenKind::KwBytes => CopyFormat::Bytes,
                TokenKind::KwString => CopyFormat::Hex,
                _ => return Err(self.err_unexpected()),
            };
            self.bump();
        }
        if matches!(self.curr.kind, TokenKind::KwIf) {
            self.bump();
            node.predicate = Some(self.parse_predicate()?);
        }
        if !matches!(
            self.curr.kind,
            TokenKind::Newline | TokenKind::Comment(_) | TokenKind::RParen
        ) {
            return Err(self.err_unexpected());
        }
        Ok(Node::Copy(Box::new(node)))
    }

    /// `push` is reserved: parsed for compatibility, dropped from the tree.
    fn parse_push(&mut self) -> Result<(), ParseError> {
        self.bump();
        let name = self.expect_ident()?;
        self.bump();
        if matches!(self.curr.kind, TokenKind::KwIf) {
            self.bump();
            let _ = self.parse_predicate()?;
        }
        debug!(name = self.interner.resolve(name), "push statement ignored");
        Ok(())
    }

    // ========== Declarations ==========

    fn parse_declare(&mut self, out: &mut Vec<Parameter>) -> Result<(), ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            match self.parse_field()? {
                Node::Param(p) => out.push(p),
                _ => return Err(self.err_message("declare: expected parameter".into())),
            }
        }
        self.is_closed()
    }

    fn parse_define(&mut self, out: &mut Vec<Constant>) -> Result<(), ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            if !self.curr.kind.is_ident_like() {
                return Err(self.err_unexpected());
            }
            let c = self.parse_constant()?;
            out.push(c);
        }
        self.is_closed()
    }

    fn parse_constant(&mut self) -> Result<Constant, ParseError> {
        let span = self.curr.span;
        let key = match self.curr.kind.clone() {
            TokenKind::Ident(_) | TokenKind::Str(_) => {
                let n = self.expect_ident()?;
                ConstantKey::Name(n)
            }
            TokenKind::Int(v) => ConstantKey::Int(v),
            TokenKind::Float(v) => ConstantKey::Float(v),
            _ => return Err(self.err_expected("ident")),
        };
        self.bump();
        self.expect_kind(&TokenKind::Assign, "=")?;
        self.bump();
        let mut value = self.parse_predicate()?;
        // Bare words on the right-hand side are labels, not lookups:
        // `enum E ( 0=A )` maps 0 to the string "A".
        if let ExprKind::Ident(n) = value.kind {
            value.kind = ExprKind::Str(self.interner.resolve(n).to_string());
        }
        if !is_literal_expr(&value) {
            return Err(self.err_message("constant value must be a literal".into()));
        }
        Ok(Constant { key, value, span })
    }

    fn parse_typedef(&mut self) -> Result<(), ParseError> {
        self.bump();
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            let label = self.expect_ident()?;
            self.bump();
            self.expect_kind(&TokenKind::Assign, "=")?;
            self.bump();

            let mut td = Typedef::default();
            td.kind = match self.curr.kind {
                TokenKind::KwInt => Some(ParamKind::Int),
                TokenKind::KwUint => Some(ParamKind::Uint),
                TokenKind::KwFloat => Some(ParamKind::Float),
                TokenKind::KwString => Some(ParamKind::Str),
                TokenKind::KwBytes => Some(ParamKind::Bytes),
                _ => None,
            };
            if td.kind.is_some() {
                self.bump();
            }
            if let TokenKind::Int(v) = self.curr.kind {
                td.size = Some(self.size_bits(v)?);
                self.bump();
            }
            match self.curr.kind {
                TokenKind::KwBig => {
                    td.endian = Some(Endianness::Big);
                    self.bump();
                }
                TokenKind::KwLittle => {
                    td.endian = Some(Endianness::Little);
                    self.bump();
                }
                _ => {}
            }
            if td.kind.is_none() && td.size.is_none() {
                return Err(self.err_message("typedef: type and length not set".into()));
            }
            self.typedefs.insert(label, td);
        }
        self.is_closed()
    }

    fn parse_alias(&mut self) -> Result<Alias, ParseError> {
        let span = self.curr.span;
        self.bump();
        let name = self.expect_ident()?;
        self.bump();
        self.expect_kind(&TokenKind::Assign, "=")?;
        self.bump();
        let target = self.expect_ident()?;
        self.bump();
        Ok(Alias { name, target, span })
    }

    fn parse_pair(&mut self, inline: bool) -> Result<Pair, ParseError> {
        let span = self.curr.span;
        let kind = match self.curr.kind {
            TokenKind::KwEnum => PairKind::Enum,
            TokenKind::KwPolynomial => PairKind::Polynomial,
            TokenKind::KwPointpair => PairKind::PointPair,
            _ => return Err(self.err_unexpected()),
        };
        self.bump();

        let mut name = None;
        if !inline {
            name = Some(self.expect_ident()?);
            self.bump();
        }
        self.expect_kind(&TokenKind::LParen, "(")?;
        self.bump();

        let mut constants = Vec::new();
        while !self.is_done() {
            self.skip_comments();
            if matches!(self.curr.kind, TokenKind::RParen) {
                break;
            }
            constants.push(self.parse_constant()?);
            if matches!(self.curr.kind, TokenKind::Comma) {
                self.bump();
            }
        }
        self.is_closed()?;

        let name = match name {
            Some(n) => n,
            None => {
                let (id, named) = self.parse_block_id()?;
                if named {
                    id
                } else {
                    let generated =
                        format!("{}-{}", kind.as_str(), self.interner.resolve(id));
                    self.interner.intern(&generated)
                }
            }
        };
        Ok(Pair {
            name,
            kind,
            constants,
            span,
        })
    }

    // ========== Expressions ==========

    /// Parse an expression starting at `curr` and advance past its last
    /// token (and a closing `]`, when present). A pending `:` is left for
    /// the caller: match cases and ternaries own it.
    fn parse_predicate(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression(BIND_LOWEST)?;
        if !matches!(self.peek.kind, TokenKind::Colon) {
            self.bump();
        }
        Ok(expr)
    }

    fn at_expr_end(&self) -> bool {
        matches!(
            self.peek.kind,
            TokenKind::RBracket
                | TokenKind::Newline
                | TokenKind::Comment(_)
                | TokenKind::Colon
                | TokenKind::Eof
        )
    }

    fn parse_expression(&mut self, pow: u8) -> Result<Expr, ParseError> {
        let mut expr = self.parse_prefix()?;
        while !self.at_expr_end() && pow < bind_power(&self.peek.kind) {
            self.bump();
            expr = match self.curr.kind {
                TokenKind::Question => self.parse_ternary_expr(expr)?,
                TokenKind::Assign => self.parse_assign_expr(expr)?,
                _ => self.parse_infix(expr)?,
            };
        }
        if matches!(self.peek.kind, TokenKind::RBracket) {
            self.bump();
        }
        Ok(expr)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let span = self.curr.span;
        match self.curr.kind.clone() {
            TokenKind::Not => {
                self.bump();
                let operand = self.parse_expression(BIND_UNARY)?;
                Ok(Expr {
                    span: span.merge(operand.span),
                    kind: ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                })
            }
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_expression(BIND_UNARY)?;
                Ok(Expr {
                    span: span.merge(operand.span),
                    kind: ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression(BIND_LOWEST)?;
                if !matches!(self.peek.kind, TokenKind::RParen) {
                    return Err(self.err_expected(")"));
                }
                self.bump();
                Ok(inner)
            }
            TokenKind::Int(v) => Ok(Expr {
                kind: ExprKind::Int(v),
                span,
            }),
            TokenKind::Float(v) => Ok(Expr {
                kind: ExprKind::Float(v),
                span,
            }),
            TokenKind::Str(s) => Ok(Expr {
                kind: ExprKind::Str(s),
                span,
            }),
            TokenKind::Bool(v) => Ok(Expr {
                kind: ExprKind::Bool(v),
                span,
            }),
            TokenKind::Ident(n) => {
                if matches!(self.peek.kind, TokenKind::Dot) {
                    self.bump();
                    self.bump();
                    let attr = match self.curr.kind {
                        TokenKind::Ident(a) => a,
                        _ => return Err(self.err_expected("ident")),
                    };
                    Ok(Expr {
                        span: span.merge(self.curr.span),
                        kind: ExprKind::Member { field: n, attr },
                    })
                } else {
                    Ok(Expr {
                        kind: ExprKind::Ident(n),
                        span,
                    })
                }
            }
            TokenKind::Internal(n) => Ok(Expr {
                kind: ExprKind::Internal(n),
                span,
            }),
            _ => Err(self.err_expected("expression")),
        }
    }

    fn parse_infix(&mut self, left: Expr) -> Result<Expr, ParseError> {
        let op = binop_of(&self.curr.kind).ok_or_else(|| self.err_unexpected())?;
        let pow = bind_power(&self.curr.kind);
        self.bump();
        let right = self.parse_expression(pow)?;

        let mut expr = Expr {
            span: left.span.merge(right.span),
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right.clone()),
            },
        };
        // `a < b < c` is sugar for `a < b && b < c`
        if op.is_relational() && is_relational_token(&self.peek.kind) {
            self.bump();
            let rest = self.parse_infix(right)?;
            expr = Expr {
                span: expr.span.merge(rest.span),
                kind: ExprKind::Binary {
                    op: BinOp::And,
                    lhs: Box::new(expr),
                    rhs: Box::new(rest),
                },
            };
        }
        Ok(expr)
    }

    fn parse_assign_expr(&mut self, left: Expr) -> Result<Expr, ParseError> {
        self.bump();
        let value = self.parse_expression(BIND_LOWEST)?;
        match left.kind {
            ExprKind::Ident(target) => Ok(Expr {
                span: left.span.merge(value.span),
                kind: ExprKind::Assign {
                    target,
                    value: Box::new(value),
                },
            }),
            _ => Err(self.err_message("assignment target must be an identifier".into())),
        }
    }

    fn parse_ternary_expr(&mut self, cond: Expr) -> Result<Expr, ParseError> {
        self.bump();
        let then = self.parse_expression(BIND_LOWEST)?;
        self.bump();
        self.expect_kind(&TokenKind::Colon, ":")?;
        self.bump();
        let otherwise = self.parse_expression(BIND_LOWEST)?;
        Ok(Expr {
            span: cond.span.merge(otherwise.span),
            kind: ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        })
    }
}

fn is_literal_expr(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) => true,
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => matches!(operand.kind, ExprKind::Int(_) | ExprKind::Float(_)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceMap;

    fn parse(src: &str) -> (Ast, StringInterner) {
        let mut interner = StringInterner::new();
        let mut sources = SourceMap::new();
        let ast = parse_source(src, "test.lay", &NoopResolver, &mut interner, &mut sources)
            .expect("parse should succeed");
        (ast, interner)
    }

    fn parse_err(src: &str) -> ParseError {
        let mut interner = StringInterner::new();
        let mut sources = SourceMap::new();
        parse_source(src, "test.lay", &NoopResolver, &mut interner, &mut sources)
            .expect_err("parse should fail")
    }

    #[test]
    fn test_parse_data_with_fields() {
        let (ast, interner) = parse("data (\n a: uint 8 big\n b: int 3 little\n)\n");
        let data = ast.data.expect("data block");
        assert_eq!(data.block.nodes.len(), 2);
        match &data.block.nodes[0] {
            Node::Param(p) => {
                assert_eq!(interner.resolve(p.name), "a");
                assert_eq!(p.kind, ParamKind::Uint);
                assert!(matches!(p.size, Some(SizeSpec::Bits(8))));
                assert_eq!(p.endian, Endianness::Big);
            }
            other => panic!("expected parameter, got {:?}", other),
        }
        match &data.block.nodes[1] {
            Node::Param(p) => {
                assert_eq!(p.kind, ParamKind::Int);
                assert_eq!(p.endian, Endianness::Little);
            }
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_default_endian_is_big() {
        let (ast, _) = parse("data (\n v: uint 32\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Param(p) => assert_eq!(p.endian, Endianness::Big),
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_named_block_and_include() {
        let (ast, interner) = parse(
            "block P (\n q: uint 8\n)\ndata (\n flag: uint 8\n include[flag == 1] P\n)\n",
        );
        assert_eq!(ast.blocks.len(), 1);
        assert_eq!(interner.resolve(ast.blocks[0].name), "P");
        let data = ast.data.unwrap();
        match &data.block.nodes[1] {
            Node::Include(inc) => {
                assert!(inc.predicate.is_some());
                assert!(matches!(inc.target, IncludeTarget::Named(_)));
            }
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn test_include_without_predicate() {
        let (ast, _) = parse("block P (\n q: uint 8\n)\ndata (\n include P\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Include(inc) => assert!(inc.predicate.is_none()),
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_enum_pair() {
        let (ast, interner) = parse("enum E (\n 0 = \"A\"\n 1 = \"B\"\n)\n");
        assert_eq!(ast.pairs.len(), 1);
        let pair = &ast.pairs[0];
        assert_eq!(interner.resolve(pair.name), "E");
        assert_eq!(pair.kind, PairKind::Enum);
        assert_eq!(pair.constants.len(), 2);
        assert!(matches!(pair.constants[0].key, ConstantKey::Int(0)));
    }

    #[test]
    fn test_enum_apply_on_field() {
        let (ast, interner) = parse("enum E (\n 0 = \"A\"\n)\ndata (\n t: uint 8, E\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Param(p) => match p.apply.as_ref().expect("apply") {
                Apply::Named(n) => assert_eq!(interner.resolve(*n), "E"),
                other => panic!("expected named apply, got {:?}", other),
            },
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_pair_apply() {
        let (ast, _) = parse("data (\n t: uint 8, enum (\n 0 = \"off\"\n 1 = \"on\"\n)\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Param(p) => match p.apply.as_ref().expect("apply") {
                Apply::Pair(pair) => {
                    assert_eq!(pair.kind, PairKind::Enum);
                    assert_eq!(pair.constants.len(), 2);
                }
                other => panic!("expected inline pair, got {:?}", other),
            },
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_expect_clause() {
        let (ast, _) = parse("data (\n magic: uint 16 == 0x55AA\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Param(p) => match &p.expect.as_ref().expect("expect").kind {
                ExprKind::Int(v) => assert_eq!(*v, 0x55AA),
                other => panic!("expected int literal, got {:?}", other),
            },
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_repeat_and_break() {
        let (ast, _) = parse("data (\n repeat[5] (\n v: uint 8\n break[v == 0]\n )\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Repeat(r) => {
                assert!(matches!(r.count.kind, ExprKind::Int(5)));
                match &r.body {
                    Node::Block(b) => {
                        assert_eq!(b.nodes.len(), 2);
                        assert!(matches!(b.nodes[1], Node::Break(_)));
                    }
                    other => panic!("expected block body, got {:?}", other),
                }
            }
            other => panic!("expected repeat, got {:?}", other),
        }
    }

    #[test]
    fn test_break_outside_repeat_is_error() {
        let err = parse_err("data (\n break[true]\n)\n");
        assert!(err.message.contains("outside of repeat"), "{}", err.message);
    }

    #[test]
    fn test_chained_comparison_desugars() {
        let (ast, _) = parse("data (\n a: uint 8\n if[0 < a < 10] (\n b: uint 8\n )\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::If(node) => match &node.cond.kind {
                ExprKind::Binary { op, lhs, rhs } => {
                    assert_eq!(*op, BinOp::And);
                    assert!(
                        matches!(lhs.kind, ExprKind::Binary { op: BinOp::Lt, .. }),
                        "lhs: {:?}",
                        lhs.kind
                    );
                    assert!(
                        matches!(rhs.kind, ExprKind::Binary { op: BinOp::Lt, .. }),
                        "rhs: {:?}",
                        rhs.kind
                    );
                }
                other => panic!("expected desugared and, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let (ast, _) = parse("data (\n let x = 1 + 2 * 3\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Let(l) => match &l.value.kind {
                ExprKind::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_parens_override_precedence() {
        let (ast, _) = parse("data (\n let x = (1 + 2) * 3\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Let(l) => match &l.value.kind {
                ExprKind::Binary { op, lhs, .. } => {
                    assert_eq!(*op, BinOp::Mul);
                    assert!(matches!(lhs.kind, ExprKind::Binary { op: BinOp::Add, .. }));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_expression() {
        let (ast, _) = parse("data (\n a: uint 8\n let x = a > 1 ? 10 : 20\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::Let(l) => assert!(matches!(l.value.kind, ExprKind::Ternary { .. })),
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_member_access() {
        let (ast, interner) = parse("data (\n t: uint 8\n if[t.eng == 1] (\n u: uint 8\n )\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::If(node) => match &node.cond.kind {
                ExprKind::Binary { lhs, .. } => match lhs.kind {
                    ExprKind::Member { field, attr } => {
                        assert_eq!(interner.resolve(field), "t");
                        assert_eq!(interner.resolve(attr), "eng");
                    }
                    ref other => panic!("expected member, got {:?}", other),
                },
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_match_with_subject() {
        let (ast, _) = parse(
            "block A (\n x: uint 8\n)\nblock B (\n y: uint 8\n)\ndata (\n t: uint 8\n match t with (\n 0: A\n 1, 2: B\n _: (\n z: uint 8\n )\n )\n)\n",
        );
        match &ast.data.unwrap().block.nodes[1] {
            Node::Match(m) => {
                assert!(m.subject.is_some());
                assert_eq!(m.cases.len(), 2);
                assert_eq!(m.cases[1].conds.len(), 2);
                assert!(m.default.is_some());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_match_duplicate_default_is_error() {
        let err = parse_err(
            "data (\n t: uint 8\n match t with (\n _: (\n a: uint 8\n )\n _: (\n b: uint 8\n )\n )\n)\n",
        );
        assert!(err.message.contains("default case"), "{}", err.message);
    }

    #[test]
    fn test_typedef_substitution() {
        let (ast, _) = parse("typedef (\n word = uint 16 little\n)\ndata (\n v: word\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Param(p) => {
                assert_eq!(p.kind, ParamKind::Uint);
                assert!(matches!(p.size, Some(SizeSpec::Bits(16))));
                assert_eq!(p.endian, Endianness::Little);
            }
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_long_form_field() {
        let (ast, interner) = parse("data (\n n: uint 8\n payload as bytes with n\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::Param(p) => {
                assert_eq!(p.kind, ParamKind::Bytes);
                match p.size {
                    Some(SizeSpec::Field(n)) => assert_eq!(interner.resolve(n), "n"),
                    ref other => panic!("expected field size, got {:?}", other),
                }
            }
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_print_clauses() {
        let (ast, interner) = parse("data (\n a: uint 8\n print raw to \"out.csv\" as csv with a\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::Print(p) => {
                assert_eq!(p.method, Method::Raw);
                assert_eq!(p.format, Format::Csv);
                assert!(matches!(p.dest, Dest::Path(ref s) if s == "out.csv"));
                assert_eq!(p.values.len(), 1);
                assert_eq!(interner.resolve(p.values[0]), "a");
            }
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_print_defaults() {
        let (ast, _) = parse("data (\n print\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Print(p) => {
                assert_eq!(p.method, Method::Debug);
                assert_eq!(p.format, Format::Csv);
                assert!(matches!(p.dest, Dest::Standard));
                assert!(p.values.is_empty());
            }
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_echo_template() {
        let (ast, _) = parse("data (\n a: uint 8\n echo \"value %[a + 1] end\"\n)\n");
        match &ast.data.unwrap().block.nodes[1] {
            Node::Echo(e) => {
                assert_eq!(e.parts.len(), 3);
                assert!(matches!(e.parts[0], EchoPart::Lit(ref s) if s == "value "));
                assert!(matches!(e.parts[1], EchoPart::Expr(_)));
                assert!(matches!(e.parts[2], EchoPart::Lit(ref s) if s == " end"));
            }
            other => panic!("expected echo, got {:?}", other),
        }
    }

    #[test]
    fn test_echo_unclosed_expression() {
        let err = parse_err("data (\n echo \"broken %[a\"\n)\n");
        assert!(err.message.contains("not closed"), "{}", err.message);
    }

    #[test]
    fn test_seek_absolute() {
        let (ast, _) = parse("data (\n seek at [16]\n a: uint 8\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Seek(s) => assert!(s.absolute),
            other => panic!("expected seek, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_statement() {
        let (ast, _) = parse("data (\n copy [4] to \"dump.bin\" as string if true\n)\n");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Copy(c) => {
                assert_eq!(c.format, CopyFormat::Hex);
                assert!(matches!(c.dest, Dest::Path(ref s) if s == "dump.bin"));
                assert!(c.predicate.is_some());
            }
            other => panic!("expected copy, got {:?}", other),
        }
    }

    #[test]
    fn test_push_is_dropped() {
        let (ast, _) = parse("data (\n a: uint 8\n push a\n)\n");
        assert_eq!(ast.data.unwrap().block.nodes.len(), 1);
    }

    #[test]
    fn test_alias_declaration() {
        let (ast, interner) = parse("block P (\n q: uint 8\n)\nalias Q = P\n");
        assert_eq!(ast.aliases.len(), 1);
        assert_eq!(interner.resolve(ast.aliases[0].name), "Q");
        assert_eq!(interner.resolve(ast.aliases[0].target), "P");
    }

    #[test]
    fn test_define_constants() {
        let (ast, interner) = parse("define (\n limit = 16\n scale = 0.5\n)\n");
        assert_eq!(ast.defines.len(), 2);
        match ast.defines[0].key {
            ConstantKey::Name(n) => assert_eq!(interner.resolve(n), "limit"),
            ref other => panic!("expected name key, got {:?}", other),
        }
    }

    #[test]
    fn test_declare_parameters() {
        let (ast, interner) = parse("declare (\n crc: uint 16\n)\ndata (\n crc\n)\n");
        assert_eq!(ast.declares.len(), 1);
        assert_eq!(interner.resolve(ast.declares[0].name), "crc");
        match &ast.data.unwrap().block.nodes[0] {
            Node::Reference(r) => assert_eq!(interner.resolve(r.target), "crc"),
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keyword_error_names_context() {
        let err = parse_err("data (\n block X (\n a: uint 8\n )\n)\n");
        assert!(err.message.contains("data"), "{}", err.message);
    }

    #[test]
    fn test_if_else_chain() {
        let (ast, _) = parse(
            "data (\n t: uint 8\n if[t == 0] (\n a: uint 8\n ) else if[t == 1] (\n b: uint 8\n ) else (\n c: uint 8\n )\n)\n",
        );
        match &ast.data.unwrap().block.nodes[1] {
            Node::If(n) => match n.otherwise.as_ref().expect("else branch") {
                Node::If(inner) => assert!(inner.otherwise.is_some()),
                other => panic!("expected nested if, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_data_pre_post_hooks() {
        let (ast, interner) = parse(
            "block setup (\n let s = 1\n)\nblock teardown (\n let t = 1\n)\ndata <setup, teardown> (\n a: uint 8\n)\n",
        );
        let data = ast.data.unwrap();
        match data.block.pre.as_deref() {
            Some(Node::Reference(r)) => assert_eq!(interner.resolve(r.target), "setup"),
            other => panic!("expected pre reference, got {:?}", other),
        }
        match data.block.post.as_deref() {
            Some(Node::Reference(r)) => assert_eq!(interner.resolve(r.target), "teardown"),
            other => panic!("expected post reference, got {:?}", other),
        }
    }

    #[test]
    fn test_data_input_files() {
        let (ast, _) = parse("data \"one.bin\" \"two.bin\" (\n a: uint 8\n)\n");
        assert_eq!(ast.data.unwrap().files, vec!["one.bin", "two.bin"]);
    }

    #[test]
    fn test_illegal_token_is_syntax_error() {
        let err = parse_err("data (\n a: uint 05\n)\n");
        assert!(err.message.contains("illegal"), "{}", err.message);
    }
}
