// Streaming bit-level decoder
//
// A Decoder owns the input buffer, the bit cursor, the field environment
// and the sink registry; the linked program is shared and immutable. The
// run loop reads a chunk, executes the data block (pre hooks, body, post
// hooks), then discards the consumed byte prefix and truncates the
// environment before the next pass. A single decoder is a single-threaded
// cursor: hosts wanting parallelism run one decoder per input stream.

pub mod output;

use std::cmp::Ordering;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::env::{Environment, Field};
use crate::epoch;
use crate::error::{DecodeError, Exec, Interrupt};
use crate::eval::eval;
use crate::link::{literal_value, Program, WellKnown};
use crate::name::{Name, StringInterner};
use crate::parser::ast::{
    Apply, Block, CopyFormat, CopyNode, Dest, EchoNode, EchoPart, Endianness, ExitCode, ExitNode,
    Expr, IfNode, Include, IncludeTarget, LetNode, MatchNode, Method, Node, Pair, PairKind,
    Parameter, ParamKind, PrintNode, RepeatNode, SeekNode, SizeSpec,
};
use crate::value::{to_hex, Value};
use output::SinkRegistry;

/// Decoder knobs. The chunk size is how many bytes each buffer growth
/// reads from the input at minimum.
#[derive(Clone)]
pub struct DecodeOptions {
    pub chunk_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { chunk_size: 4096 }
    }
}

type PassHook<'p> = Box<dyn FnMut(&[Field], &StringInterner) + 'p>;

pub struct Decoder<'p> {
    program: &'p Program,
    options: DecodeOptions,
    input: Option<Box<dyn Read + 'p>>,
    buffer: Vec<u8>,
    /// Bit cursor into the buffer.
    pos: u64,
    loop_count: i64,
    iter: i64,
    blocks: Vec<Name>,
    current_file: String,
    env: Environment,
    sinks: SinkRegistry<'p>,
    pass_hook: Option<PassHook<'p>>,
}

impl<'p> Decoder<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self::with_options(program, DecodeOptions::default())
    }

    pub fn with_options(program: &'p Program, options: DecodeOptions) -> Self {
        Self {
            program,
            options,
            input: None,
            buffer: Vec::new(),
            pos: 0,
            loop_count: 0,
            iter: 0,
            blocks: Vec::new(),
            current_file: String::new(),
            env: Environment::new(),
            sinks: SinkRegistry::new(),
            pass_hook: None,
        }
    }

    /// Redirect the standard output sink (`print to -`).
    pub fn set_stdout(&mut self, w: Box<dyn Write + 'p>) {
        self.sinks.set_stdout(w);
    }

    /// Redirect the standard error sink (echo's default).
    pub fn set_stderr(&mut self, w: Box<dyn Write + 'p>) {
        self.sinks.set_stderr(w);
    }

    /// Observe the decoded fields at the end of every pass, before the
    /// environment is truncated.
    pub fn on_pass(&mut self, hook: impl FnMut(&[Field], &StringInterner) + 'p) {
        self.pass_hook = Some(Box::new(hook));
    }

    pub fn run<R: Read + 'p>(&mut self, input: R) -> Result<i64, DecodeError> {
        self.run_named("stream", input)
    }

    /// Decode one input stream to exhaustion. Returns the exit code: zero
    /// unless the schema executed a non-zero `exit`.
    pub fn run_named<R: Read + 'p>(&mut self, name: &str, input: R) -> Result<i64, DecodeError> {
        self.current_file = name.to_string();
        self.input = Some(Box::new(input));
        self.buffer.clear();
        self.pos = 0;
        self.loop_count = 0;
        self.env.clear();

        let chunk_bits = (self.options.chunk_size * 8) as i64;
        let mut code = 0i64;
        loop {
            self.grow(chunk_bits)?;
            if self.buffer.is_empty() {
                break;
            }
            debug!(
                pass = self.loop_count,
                buffered = self.buffer.len(),
                file = %self.current_file,
                "decoding pass"
            );
            match self.decode_pass() {
                Ok(()) => {}
                Err(Interrupt::Done) => break,
                Err(Interrupt::Exit(c)) => {
                    code = c;
                    break;
                }
                Err(Interrupt::Break) | Err(Interrupt::Continue) | Err(Interrupt::Skip) => {
                    return Err(DecodeError::new("stray control-flow signal")
                        .with_path(self.path()));
                }
                Err(Interrupt::Error(e)) => return Err(e.with_path(self.path())),
            }
            // A pass that consumed no whole byte would replay forever on
            // the same buffer.
            if self.pos / 8 == 0 {
                return Err(DecodeError::new("data block consumed no input"));
            }
            self.end_pass();
        }
        self.input = None;
        if let Err(e) = self.sinks.flush() {
            return Err(DecodeError::new(format!("flush: {}", e)));
        }
        Ok(code)
    }

    fn decode_pass(&mut self) -> Exec<()> {
        let program = self.program;
        self.decode_block(&program.data.block, None)
    }

    fn end_pass(&mut self) {
        if let Some(mut hook) = self.pass_hook.take() {
            hook(self.env.fields(), self.program.interner());
            self.pass_hook = Some(hook);
        }
        self.loop_count += 1;
        let consumed = (self.pos / 8) as usize;
        if consumed < self.buffer.len() {
            self.buffer.drain(..consumed);
        } else {
            self.buffer.clear();
        }
        self.env.clear();
        self.pos = 0;
    }

    // ========== State access for the evaluator ==========

    pub(crate) fn names(&self) -> &'p WellKnown {
        &self.program.names
    }

    pub(crate) fn interner(&self) -> &'p StringInterner {
        self.program.interner()
    }

    pub(crate) fn lookup_field(&self, name: Name) -> Option<&Field> {
        self.env.resolve(name)
    }

    /// Identifier resolution: environment first, then defined constants.
    pub(crate) fn resolve_ident(&self, name: Name) -> Result<Value, DecodeError> {
        if let Some(f) = self.env.resolve(name) {
            return Ok(f.raw.clone());
        }
        if let Some(v) = self.program.constant(name) {
            return Ok(v.clone());
        }
        Err(DecodeError::new(format!(
            "{}: field not defined",
            self.interner().resolve(name)
        )))
    }

    pub(crate) fn define_assigned(&mut self, name: Name, value: Value) {
        let mut field = Field::synthesized(name, value);
        field.block = self.blocks.last().copied();
        field.iter = self.iter;
        self.env.define(field);
    }

    pub(crate) fn internal_value(&self, name: Name) -> Result<Value, DecodeError> {
        let wk = self.names();
        let v = if name == wk.iter {
            Value::Int(self.iter)
        } else if name == wk.loop_ {
            Value::Int(self.loop_count)
        } else if name == wk.time {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Value::Int(now)
        } else if name == wk.num {
            Value::Int(self.env.len() as i64)
        } else if name == wk.cursor {
            Value::Int(self.pos as i64)
        } else if name == wk.size {
            Value::Int(self.size_bits() as i64)
        } else if name == wk.file {
            Value::Str(self.current_file.clone())
        } else if name == wk.block {
            let block = match self.blocks.last() {
                Some(b) => self.interner().resolve(*b).to_string(),
                None => String::from("block"),
            };
            Value::Str(block)
        } else if name == wk.path {
            Value::Str(self.path())
        } else {
            return Err(DecodeError::new(format!(
                "{}: unknown internal value",
                self.interner().resolve(name)
            )));
        };
        Ok(v)
    }

    fn path(&self) -> String {
        let interner = self.interner();
        let mut out = String::new();
        for b in &self.blocks {
            out.push('/');
            out.push_str(interner.resolve(*b));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    fn size_bits(&self) -> u64 {
        self.buffer.len() as u64 * 8
    }

    // ========== Buffer management ==========

    /// Make sure the next `bits` past the cursor are buffered, reading at
    /// least one chunk from the input when they are not.
    fn grow(&mut self, bits: i64) -> Result<(), DecodeError> {
        if bits > 0 {
            let target = ((self.pos as i64 + bits) / 8) as usize;
            if target < self.buffer.len() {
                return Ok(());
            }
        }
        let want = self.options.chunk_size + if bits > 0 { (bits / 8) as usize } else { 0 };
        let reader = match self.input.as_mut() {
            Some(r) => r,
            None => return Ok(()),
        };
        let mut tmp = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match reader.read(&mut tmp[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::new(format!("read: {}", e))),
            }
        }
        self.buffer.extend_from_slice(&tmp[..filled]);
        Ok(())
    }

    // ========== Statement execution ==========

    fn decode_block(&mut self, block: &Block, label: Option<Name>) -> Exec<()> {
        self.blocks.push(label.unwrap_or(block.name));
        trace!(path = %self.path(), "entering block");
        let result = self.decode_block_body(block);
        self.blocks.pop();
        result
    }

    fn decode_block_body(&mut self, block: &Block) -> Exec<()> {
        if let Some(pre) = &block.pre {
            self.decode_hook(pre)?;
        }
        self.decode_nodes(&block.nodes)?;
        if let Some(post) = &block.post {
            self.decode_hook(post)?;
        }
        Ok(())
    }

    /// Pre/post hooks run in the enclosing block's path.
    fn decode_hook(&mut self, node: &Node) -> Exec<()> {
        match node {
            Node::Block(b) => self.decode_nodes(&b.nodes),
            _ => Err(DecodeError::new("unresolved hook block").into()),
        }
    }

    fn decode_nodes(&mut self, nodes: &[Node]) -> Exec<()> {
        for node in nodes {
            match node {
                Node::Param(p) => {
                    let field = self.decode_parameter(p)?;
                    self.env.define(field);
                }
                Node::Block(b) => self.decode_block(b, None)?,
                Node::Include(inc) => {
                    if let Err(e) = self.decode_include(inc) {
                        if !matches!(e, Interrupt::Skip) {
                            return Err(e);
                        }
                    }
                }
                Node::If(f) => self.decode_if(f)?,
                Node::Match(m) => self.decode_match(m)?,
                Node::Repeat(r) => self.decode_repeat(r)?,
                Node::Break(pred) => {
                    if eval(pred, self)?.truthy() {
                        return Err(Interrupt::Break);
                    }
                }
                Node::Continue(pred) => {
                    if eval(pred, self)?.truthy() {
                        return Err(Interrupt::Continue);
                    }
                }
                Node::Let(l) => {
                    let field = self.decode_let(l)?;
                    self.env.define(field);
                }
                Node::Del(d) => {
                    for n in &d.names {
                        self.env.delete(*n, false);
                    }
                }
                Node::Seek(s) => self.decode_seek(s)?,
                Node::Peek(count) => self.decode_peek(count)?,
                Node::Exit(e) => return self.decode_exit(e),
                Node::Print(p) => self.decode_print(p)?,
                Node::Echo(e) => self.decode_echo(e)?,
                Node::Copy(c) => self.decode_copy(c)?,
                Node::Reference(r) => {
                    return Err(DecodeError::new(format!(
                        "{}: unresolved reference",
                        self.interner().resolve(r.target)
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    // ========== Parameters ==========

    fn param_size(&self, p: &Parameter) -> Result<u64, DecodeError> {
        match &p.size {
            None => Ok(1),
            Some(SizeSpec::Bits(n)) => Ok(*n as u64),
            Some(SizeSpec::Field(name)) => {
                let v = self.resolve_ident(*name)?.as_i64();
                if v < 0 {
                    return Err(DecodeError::new(format!(
                        "{}: negative field size {}",
                        self.interner().resolve(p.name),
                        v
                    )));
                }
                Ok(v as u64)
            }
        }
    }

    fn short_buffer(&self, missing: usize, p: &Parameter) -> DecodeError {
        let block = match self.blocks.last() {
            Some(b) => self.interner().resolve(*b),
            None => "",
        };
        DecodeError::short_read(format!(
            "short buffer: missing {} bytes (decoding {}.{})",
            missing,
            block,
            self.interner().resolve(p.name)
        ))
    }

    fn decode_parameter(&mut self, p: &Parameter) -> Exec<Field> {
        let size = self.param_size(p)?;
        let start = self.pos;
        let offset = (self.pos % 8) as u32;
        let index = (self.pos / 8) as usize;

        let (raw, eng, consumed) = if p.kind.sized_in_bytes() {
            if offset != 0 {
                return Err(DecodeError::new(format!(
                    "{}: bytes/string must start on a byte boundary",
                    self.interner().resolve(p.name)
                ))
                .into());
            }
            if size > u32::MAX as u64 {
                return Err(DecodeError::new(format!(
                    "{}: unsupported size {} bytes",
                    self.interner().resolve(p.name),
                    size
                ))
                .into());
            }
            let nbytes = size as usize;
            self.grow((size * 8) as i64)?;
            if self.buffer.len() < index + nbytes {
                return Err(self.short_buffer(index + nbytes - self.buffer.len(), p).into());
            }
            let slice = &self.buffer[index..index + nbytes];
            let raw = match p.kind {
                ParamKind::Bytes => Value::Bytes(slice.to_vec()),
                _ => Value::Str(
                    String::from_utf8_lossy(slice)
                        .trim_matches('\0')
                        .to_string(),
                ),
            };
            (raw, None, size * 8)
        } else {
            if size == 0 || size > 64 {
                return Err(DecodeError::new(format!(
                    "{}: unsupported width {} bits",
                    self.interner().resolve(p.name),
                    size
                ))
                .into());
            }
            let bits = size as u32;
            if p.kind == ParamKind::Float && bits != 32 && bits != 64 {
                return Err(DecodeError::new(format!(
                    "{}: float width must be 32 or 64, not {}",
                    self.interner().resolve(p.name),
                    bits
                ))
                .into());
            }
            self.grow((offset + bits) as i64)?;
            let need = ((offset + bits + 7) / 8) as usize;
            if self.buffer.len() < index + need {
                return Err(self.short_buffer(index + need - self.buffer.len(), p).into());
            }
            let dat = extract_bits(&self.buffer[index..index + need], offset, bits, p.endian);
            let raw = match p.kind {
                ParamKind::Int => Value::Int(sign_extend(dat, bits)),
                ParamKind::Float => {
                    if bits == 32 {
                        Value::Real(f32::from_bits(dat as u32) as f64)
                    } else {
                        Value::Real(f64::from_bits(dat))
                    }
                }
                _ => Value::Uint(dat),
            };
            let eng = match p.kind {
                ParamKind::TimeGps => Some(Value::Uint(epoch::gps_to_unix(dat))),
                _ => None,
            };
            (raw, eng, bits as u64)
        };

        let mut field = Field {
            block: self.blocks.last().copied(),
            id: p.name,
            pos: start,
            len: consumed,
            iter: self.iter,
            raw,
            eng,
        };

        match &p.apply {
            Some(Apply::Pair(pair)) => {
                field.eng = Some(self.apply_pair(pair, &field.raw)?);
            }
            Some(Apply::Named(n)) => {
                return Err(DecodeError::new(format!(
                    "{}: unresolved pair",
                    self.interner().resolve(*n)
                ))
                .into());
            }
            None => {}
        }

        if let Some(expect) = &p.expect {
            let want = eval(expect, self)?;
            if field.raw.compare(&want) != Some(Ordering::Equal) {
                return Err(DecodeError::new(format!(
                    "{} expectation failed: want {}, got {}",
                    self.interner().resolve(p.name),
                    want,
                    field.raw
                ))
                .into());
            }
        }
        self.pos += consumed;
        Ok(field)
    }

    // ========== Conversion pairs ==========

    fn apply_pair(&mut self, pair: &Pair, raw: &Value) -> Result<Value, DecodeError> {
        match pair.kind {
            PairKind::Enum => self.apply_enum(pair, raw),
            PairKind::Polynomial => self.apply_polynomial(pair, raw),
            PairKind::PointPair => self.apply_pointpair(pair, raw),
        }
    }

    fn pair_entry(&self, pair: &Pair, ix: usize) -> Result<(i64, Value), DecodeError> {
        let c = &pair.constants[ix];
        let key = c.key.as_i64().ok_or_else(|| {
            DecodeError::new(format!(
                "{}: pair entry key must be numeric",
                self.interner().resolve(pair.name)
            ))
        })?;
        let value = literal_value(&c.value).ok_or_else(|| {
            DecodeError::new(format!(
                "{}: pair entry value must be a literal",
                self.interner().resolve(pair.name)
            ))
        })?;
        Ok((key, value))
    }

    /// Matching id becomes the constant's label; no match keeps the raw
    /// value unchanged.
    fn apply_enum(&mut self, pair: &Pair, raw: &Value) -> Result<Value, DecodeError> {
        let want = raw.as_i64();
        for ix in 0..pair.constants.len() {
            let (key, value) = self.pair_entry(pair, ix)?;
            if key == want {
                return Ok(Value::Str(value.as_string()));
            }
        }
        Ok(raw.clone())
    }

    /// Sum of coeff * raw^power over all entries.
    fn apply_polynomial(&mut self, pair: &Pair, raw: &Value) -> Result<Value, DecodeError> {
        let x = raw.as_f64();
        let mut sum = 0.0;
        for (ix, c) in pair.constants.iter().enumerate() {
            let power = c.key.as_f64().ok_or_else(|| {
                DecodeError::new(format!(
                    "{}: pair entry key must be numeric",
                    self.interner().resolve(pair.name)
                ))
            })?;
            let (_, coeff) = self.pair_entry(pair, ix)?;
            sum += coeff.as_f64() * x.powf(power);
        }
        Ok(Value::Real(sum))
    }

    /// Exact id match maps directly; ids bracketing the value interpolate
    /// linearly; outside the table the raw value passes through.
    fn apply_pointpair(&mut self, pair: &Pair, raw: &Value) -> Result<Value, DecodeError> {
        let x = raw.as_i64();
        for ix in 0..pair.constants.len() {
            let (id, value) = self.pair_entry(pair, ix)?;
            if x == id {
                return Ok(Value::Real(value.as_f64()));
            }
            if ix + 1 < pair.constants.len() {
                let (next_id, next_value) = self.pair_entry(pair, ix + 1)?;
                if id < x && x < next_id {
                    let y0 = value.as_f64();
                    let y1 = next_value.as_f64();
                    let t = (x - id) as f64 / (next_id - id) as f64;
                    return Ok(Value::Real(y0 + t * (y1 - y0)));
                }
            }
        }
        Ok(raw.clone())
    }

    // ========== Control flow ==========

    fn decode_include(&mut self, inc: &Include) -> Exec<()> {
        if let Some(pred) = &inc.predicate {
            if !eval(pred, self)?.truthy() {
                trace!("include skipped");
                return Err(Interrupt::Skip);
            }
        }
        match &inc.target {
            IncludeTarget::Inline(b) => self.decode_block(b, None),
            IncludeTarget::Named(r) => {
                let program = self.program;
                let block = program.block(r.target).ok_or_else(|| {
                    DecodeError::new(format!(
                        "{}: block not defined",
                        program.interner().resolve(r.target)
                    ))
                })?;
                let label = r.alias.filter(|a| *a != r.target);
                self.decode_block(block, label)
            }
        }
    }

    fn decode_if(&mut self, f: &IfNode) -> Exec<()> {
        let node = if eval(&f.cond, self)?.truthy() {
            Some(&f.then)
        } else {
            f.otherwise.as_ref()
        };
        match node {
            Some(n) => self.decode_body_node(n),
            None => Ok(()),
        }
    }

    fn decode_body_node(&mut self, node: &Node) -> Exec<()> {
        match node {
            Node::Block(b) => self.decode_block(b, None),
            Node::If(f) => self.decode_if(f),
            _ => Err(DecodeError::new("unresolved control-flow body").into()),
        }
    }

    fn decode_match(&mut self, m: &MatchNode) -> Exec<()> {
        let mut chosen: Option<&Node> = None;
        if let Some(subject) = &m.subject {
            let subj = eval(subject, self)?;
            'subject: for case in &m.cases {
                for cond in &case.conds {
                    let v = eval(cond, self)?;
                    if subj.compare(&v) == Some(Ordering::Equal) {
                        chosen = Some(&case.body);
                        break 'subject;
                    }
                }
            }
        } else {
            'predicate: for case in &m.cases {
                for cond in &case.conds {
                    if eval(cond, self)?.truthy() {
                        chosen = Some(&case.body);
                        break 'predicate;
                    }
                }
            }
        }
        match chosen.or(m.default.as_ref()) {
            Some(node) => self.decode_body_node(node),
            // No branch and no default is a no-op, not an error.
            None => Ok(()),
        }
    }

    fn decode_repeat(&mut self, r: &RepeatNode) -> Exec<()> {
        let body = match &r.body {
            Node::Block(b) => Rc::clone(b),
            _ => return Err(DecodeError::new("unresolved repeat body").into()),
        };
        let saved = self.iter;
        self.iter = 0;
        let result = if r.count.yields_bool() {
            self.repeat_while(&r.count, &body)
        } else {
            self.repeat_times(&r.count, &body)
        };
        self.iter = saved;
        result
    }

    fn repeat_while(&mut self, cond: &Expr, body: &Block) -> Exec<()> {
        loop {
            if !eval(cond, self).map_err(Interrupt::Error)?.truthy() {
                return Ok(());
            }
            match self.decode_block(body, None) {
                Ok(()) => self.iter += 1,
                Err(Interrupt::Continue) => continue,
                Err(Interrupt::Break) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn repeat_times(&mut self, count: &Expr, body: &Block) -> Exec<()> {
        let mut times = eval(count, self)?.as_u64();
        // A zero count still decodes once.
        if times == 0 {
            times = 1;
        }
        for _ in 0..times {
            match self.decode_block(body, None) {
                Ok(()) => self.iter += 1,
                Err(Interrupt::Continue) => continue,
                Err(Interrupt::Break) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ========== Simple statements ==========

    fn decode_let(&mut self, l: &LetNode) -> Exec<Field> {
        let value = eval(&l.value, self)?;
        let mut field = Field::synthesized(l.name, value.clone());
        field.eng = Some(value);
        field.iter = self.iter;
        Ok(field)
    }

    fn decode_seek(&mut self, s: &SeekNode) -> Exec<()> {
        let seek = eval(&s.offset, self)?.as_i64();
        self.grow(seek)?;
        let next = if s.absolute {
            seek as i128
        } else {
            self.pos as i128 + seek as i128
        };
        if next < 0 || next > self.size_bits() as i128 {
            return Err(DecodeError::new(format!(
                "seek outside of buffer range ({} > {})",
                next,
                self.size_bits()
            ))
            .into());
        }
        self.pos = next as u64;
        Ok(())
    }

    fn decode_peek(&mut self, count: &Expr) -> Exec<()> {
        let bits = eval(count, self)?.as_i64();
        self.grow(bits)?;
        Ok(())
    }

    fn decode_exit(&mut self, e: &ExitNode) -> Exec<()> {
        let code = match &e.code {
            ExitCode::Code(v) => *v,
            ExitCode::Field(n) => self.resolve_ident(*n)?.as_i64(),
        };
        debug!(code, "exit");
        Err(Interrupt::Exit(code))
    }

    // ========== Output statements ==========

    /// Destination for print/echo/copy: a literal path, or an identifier
    /// resolved against the environment with the identifier text itself as
    /// the fallback path. None routes to the standard sinks.
    fn dest_file(&self, dest: &Dest) -> Option<String> {
        match dest {
            Dest::Standard => None,
            Dest::Path(p) => Some(p.clone()),
            Dest::Field(n) => match self.env.resolve(*n) {
                Some(f) => Some(f.raw.as_string()),
                None => Some(self.interner().resolve(*n).to_string()),
            },
        }
    }

    fn collect_print_fields(&self, names: &[Name], method: Method) -> Vec<Field> {
        let interner = self.interner();
        if names.is_empty() {
            return self
                .env
                .fields()
                .iter()
                .filter(|f| method == Method::Debug || !f.hidden(interner))
                .cloned()
                .collect();
        }
        let mut out: Vec<Field> = names
            .iter()
            .filter_map(|n| self.env.resolve(*n).cloned())
            .collect();
        out.sort_by_key(|f| f.pos);
        out
    }

    fn decode_print(&mut self, p: &PrintNode) -> Exec<()> {
        if let Some(pred) = &p.predicate {
            if !eval(pred, self)?.truthy() {
                return Ok(());
            }
        }
        let fields = self.collect_print_fields(&p.values, p.method);
        let key = self.path();
        let file = self.dest_file(&p.dest);
        let interner = self.interner();
        let w = self.sinks.open(&key, file.as_deref(), false)?;
        output::write_record(w, p.format, p.method, &fields, interner)
            .map_err(|e| DecodeError::new(format!("print: {}", e)))?;
        Ok(())
    }

    fn decode_echo(&mut self, e: &EchoNode) -> Exec<()> {
        let mut text = String::new();
        for part in &e.parts {
            match part {
                EchoPart::Lit(s) => text.push_str(s),
                EchoPart::Expr(x) => {
                    let v = eval(x, self)?;
                    text.push_str(&v.format_raw(false));
                }
            }
        }
        text.push_str("\r\n");
        let key = self.path();
        let file = self.dest_file(&e.dest);
        let w = self.sinks.open(&key, file.as_deref(), true)?;
        w.write_all(text.as_bytes())
            .map_err(|e| DecodeError::new(format!("echo: {}", e)))?;
        Ok(())
    }

    /// Emit raw buffer bytes from the current byte index without moving
    /// the cursor.
    fn decode_copy(&mut self, c: &CopyNode) -> Exec<()> {
        if let Some(pred) = &c.predicate {
            if !eval(pred, self)?.truthy() {
                return Ok(());
            }
        }
        let count = eval(&c.count, self)?.as_i64();
        if count < 0 {
            return Err(DecodeError::new(format!("copy: negative count {}", count)).into());
        }
        let count = count as usize;
        self.grow((count as i64).saturating_mul(8))?;
        let index = (self.pos / 8) as usize;
        if self.buffer.len() < index + count {
            return Err(DecodeError::short_read(format!(
                "short buffer: missing {} bytes (copy)",
                index + count - self.buffer.len()
            ))
            .into());
        }
        let bytes = self.buffer[index..index + count].to_vec();
        let key = self.path();
        let file = self.dest_file(&c.dest);
        let w = self.sinks.open(&key, file.as_deref(), false)?;
        let result = match c.format {
            CopyFormat::Bytes => w.write_all(&bytes),
            CopyFormat::Hex => w.write_all(to_hex(&bytes).as_bytes()),
        };
        result.map_err(|e| DecodeError::new(format!("copy: {}", e)))?;
        Ok(())
    }
}

/// Compose the bit window `[offset, offset+bits)` of a byte span into an
/// integer. Little-endian spans of up to eight whole bytes are reversed
/// before composition; odd-length spans pass through unswapped.
fn extract_bits(span: &[u8], offset: u32, bits: u32, endian: Endianness) -> u64 {
    let mut bytes = [0u8; 16];
    let n = span.len().min(16);
    bytes[..n].copy_from_slice(&span[..n]);
    if endian == Endianness::Little && n <= 8 && n % 2 == 0 {
        bytes[..n].reverse();
    }
    let mut acc: u128 = 0;
    for b in &bytes[..n] {
        acc = (acc << 8) | *b as u128;
    }
    let shift = n as u32 * 8 - (offset + bits);
    let mask: u128 = if bits >= 64 {
        u64::MAX as u128
    } else {
        (1u128 << bits) - 1
    };
    ((acc >> shift) & mask) as u64
}

/// Two's-complement interpretation of a `bits`-wide window.
fn sign_extend(dat: u64, bits: u32) -> i64 {
    if bits < 64 && (dat >> (bits - 1)) & 1 == 1 {
        (dat | (!0u64 << bits)) as i64
    } else {
        dat as i64
    }
}
