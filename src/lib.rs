// Interpreter for a declarative binary layout language: schemas declare
// typed bit-fields, compose them into blocks, attach engineering
// conversions and steer traversal with conditionals, matches and loops;
// the decoder executes a schema against a byte stream and emits records
// to output sinks.

pub mod decode;
pub mod describe;
pub mod env;
pub mod epoch;
pub mod error;
mod eval;
pub mod lexer;
pub mod link;
pub mod name;
pub mod parser;
pub mod span;
pub mod value;

pub use decode::{DecodeOptions, Decoder};
pub use env::{Environment, Field};
pub use error::{DecodeError, Error, LinkError, LinkErrorKind, ParseError};
pub use link::{link, Program};
pub use name::{Name, StringInterner};
pub use parser::ast::Ast;
pub use parser::{FsResolver, IncludeResolver, NoopResolver};
pub use value::Value;

use std::io::Read;

use parser::parse_source;
use span::SourceMap;

/// A parsed schema: the declaration tree plus the interner and source map
/// it was built against. Feed it to [`link`] to get a runnable program.
#[derive(Debug)]
pub struct Schema {
    pub ast: Ast,
    pub interner: StringInterner,
    pub sources: SourceMap,
}

/// Entry point tying the pipeline together: parse, link, decode. The
/// include resolver decides how `include` directives find their files.
pub struct LayoutEngine {
    resolver: Box<dyn IncludeResolver>,
}

impl LayoutEngine {
    /// Engine that rejects includes. Use [`LayoutEngine::with_resolver`]
    /// for multi-file schemas.
    pub fn new() -> Self {
        Self {
            resolver: Box::new(NoopResolver),
        }
    }

    pub fn with_resolver(resolver: impl IncludeResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Parse schema text into a declaration tree.
    pub fn parse(&self, source: &str, file: &str) -> Result<Schema, ParseError> {
        let mut interner = StringInterner::new();
        let mut sources = SourceMap::new();
        let ast = parse_source(
            source,
            file,
            self.resolver.as_ref(),
            &mut interner,
            &mut sources,
        )?;
        Ok(Schema {
            ast,
            interner,
            sources,
        })
    }

    /// Parse and link in one step.
    pub fn load(&self, source: &str, file: &str) -> Result<Program, Error> {
        let schema = self.parse(source, file)?;
        let program = link(schema.ast, schema.interner, schema.sources)?;
        Ok(program)
    }

    /// Parse, link and decode one input stream. A non-zero `exit` from the
    /// schema surfaces as [`Error::Exit`].
    pub fn run(&self, source: &str, input: impl Read) -> Result<(), Error> {
        let program = self.load(source, "<input>")?;
        let mut decoder = Decoder::new(&program);
        let code = decoder.run(input)?;
        if code != 0 {
            return Err(Error::Exit(code));
        }
        Ok(())
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}
