// Resolver/merger: turns a parsed schema into an executable program
//
// Lookups go through flat name tables, never owned pointer cycles: every
// named block is merged exactly once into a Name -> Rc<Block> table.
// Unpredicated includes inline their target's merged node (a cycle of
// those is an error, it could never terminate); predicated includes keep
// the target name and the decoder resolves it through the table when the
// predicate passes, so mutually-recursive gated layouts are legal.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{LinkError, LinkErrorKind};
use crate::name::{Name, StringInterner};
use crate::parser::ast::{
    Apply, Ast, Block, ConstantKey, Data, Expr, ExprKind, IfNode, Include, IncludeTarget,
    MatchCase, MatchNode, Node, Pair, Parameter, Reference, RepeatNode, UnaryOp,
};
use crate::span::SourceMap;
use crate::value::Value;

/// Names the evaluator compares against, interned once at link time.
#[derive(Debug)]
pub struct WellKnown {
    pub raw: Name,
    pub eng: Name,
    pub id: Name,
    pub pos: Name,
    pub len: Name,
    pub iter: Name,
    pub loop_: Name,
    pub time: Name,
    pub num: Name,
    pub cursor: Name,
    pub size: Name,
    pub file: Name,
    pub block: Name,
    pub path: Name,
}

impl WellKnown {
    fn intern(interner: &mut StringInterner) -> Self {
        Self {
            raw: interner.intern("raw"),
            eng: interner.intern("eng"),
            id: interner.intern("id"),
            pos: interner.intern("pos"),
            len: interner.intern("len"),
            iter: interner.intern("Iter"),
            loop_: interner.intern("Loop"),
            time: interner.intern("Time"),
            num: interner.intern("Num"),
            cursor: interner.intern("Pos"),
            size: interner.intern("Size"),
            file: interner.intern("File"),
            block: interner.intern("Block"),
            path: interner.intern("Path"),
        }
    }
}

/// A linked schema, ready to decode. Immutable once built; several
/// decoders may share one program.
#[derive(Debug)]
pub struct Program {
    pub data: Data,
    blocks: FxHashMap<Name, Rc<Block>>,
    consts: FxHashMap<Name, Value>,
    pub interner: StringInterner,
    pub sources: SourceMap,
    pub names: WellKnown,
}

impl Program {
    pub fn block(&self, name: Name) -> Option<&Rc<Block>> {
        self.blocks.get(&name)
    }

    pub fn constant(&self, name: Name) -> Option<&Value> {
        self.consts.get(&name)
    }

    pub fn interner(&self) -> &StringInterner {
        &self.interner
    }
}

/// Evaluate a literal-restricted constant expression.
pub(crate) fn literal_value(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Int(v) => Some(Value::Int(*v)),
        ExprKind::Float(v) => Some(Value::Real(*v)),
        ExprKind::Str(s) => Some(Value::Str(s.clone())),
        ExprKind::Bool(b) => Some(Value::Bool(*b)),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match operand.kind {
            ExprKind::Int(v) => Some(Value::Int(v.wrapping_neg())),
            ExprKind::Float(v) => Some(Value::Real(-v)),
            _ => None,
        },
        _ => None,
    }
}

pub fn link(ast: Ast, mut interner: StringInterner, sources: SourceMap) -> Result<Program, LinkError> {
    let names = WellKnown::intern(&mut interner);

    let mut consts: FxHashMap<Name, Value> = FxHashMap::default();
    for c in &ast.defines {
        if let ConstantKey::Name(n) = c.key {
            let v = literal_value(&c.value)
                .ok_or_else(|| LinkError::new(LinkErrorKind::BadConstant, interner.resolve(n)))?;
            consts.insert(n, v);
        }
    }

    let mut src_blocks: FxHashMap<Name, &Block> = FxHashMap::default();
    for b in &ast.blocks {
        src_blocks.insert(b.name, b);
    }
    let mut params: FxHashMap<Name, &Parameter> = FxHashMap::default();
    for p in &ast.declares {
        params.insert(p.name, p);
    }
    let mut pairs: FxHashMap<Name, Rc<Pair>> = FxHashMap::default();
    for p in &ast.pairs {
        pairs.insert(p.name, Rc::new(p.clone()));
    }

    let mut linker = Linker {
        src_blocks,
        params,
        pairs,
        merged: FxHashMap::default(),
        in_progress: FxHashSet::default(),
        interner: &interner,
    };

    for b in &ast.blocks {
        linker.merge_named(b.name)?;
    }
    for a in &ast.aliases {
        let target = linker.merge_named(a.target)?;
        let mut renamed = (*target).clone();
        renamed.name = a.name;
        linker.merged.insert(a.name, Rc::new(renamed));
        debug!(
            alias = interner.resolve(a.name),
            target = interner.resolve(a.target),
            "expanded alias"
        );
    }

    let data_src = ast
        .data
        .as_ref()
        .ok_or_else(|| LinkError::new(LinkErrorKind::MissingData, "data"))?;
    let block = linker.merge_block(&data_src.block)?;
    let data = Data {
        block,
        files: data_src.files.clone(),
    };
    // Dismantle the linker so its borrow of the interner ends before the
    // interner moves into the program.
    let Linker { merged: blocks, .. } = linker;

    Ok(Program {
        data,
        blocks,
        consts,
        interner,
        sources,
        names,
    })
}

struct Linker<'a> {
    src_blocks: FxHashMap<Name, &'a Block>,
    params: FxHashMap<Name, &'a Parameter>,
    pairs: FxHashMap<Name, Rc<Pair>>,
    merged: FxHashMap<Name, Rc<Block>>,
    in_progress: FxHashSet<Name>,
    interner: &'a StringInterner,
}

impl<'a> Linker<'a> {
    fn merge_named(&mut self, name: Name) -> Result<Rc<Block>, LinkError> {
        if let Some(done) = self.merged.get(&name) {
            return Ok(Rc::clone(done));
        }
        if self.in_progress.contains(&name) {
            return Err(LinkError::new(
                LinkErrorKind::RecursiveInclude,
                self.interner.resolve(name),
            ));
        }
        let src = *self
            .src_blocks
            .get(&name)
            .ok_or_else(|| LinkError::new(LinkErrorKind::MissingBlock, self.interner.resolve(name)))?;
        self.in_progress.insert(name);
        let out = self.merge_block(src);
        self.in_progress.remove(&name);
        let merged = Rc::new(out?);
        self.merged.insert(name, Rc::clone(&merged));
        Ok(merged)
    }

    /// Merged block named by a reference, renamed when aliased.
    fn named_with_alias(&mut self, r: &Reference) -> Result<Rc<Block>, LinkError> {
        let merged = self.merge_named(r.target)?;
        match r.alias {
            Some(alias) if alias != r.target => {
                let mut renamed = (*merged).clone();
                renamed.name = alias;
                Ok(Rc::new(renamed))
            }
            _ => Ok(merged),
        }
    }

    fn merge_block(&mut self, b: &Block) -> Result<Block, LinkError> {
        let mut out = Block::new(b.name, b.span);
        if let Some(pre) = &b.pre {
            out.pre = Some(Box::new(self.merge_body(pre)?));
        }
        if let Some(post) = &b.post {
            out.post = Some(Box::new(self.merge_body(post)?));
        }
        out.nodes = self.merge_nodes(&b.nodes)?;
        Ok(out)
    }

    fn merge_nodes(&mut self, nodes: &[Node]) -> Result<Vec<Node>, LinkError> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            let merged = match node {
                Node::Param(p) => Node::Param(self.merge_param(p)?),
                // A bare name in a statement list refers to a declared
                // parameter.
                Node::Reference(r) => {
                    let p = *self.params.get(&r.target).ok_or_else(|| {
                        LinkError::new(
                            LinkErrorKind::MissingParameter,
                            self.interner.resolve(r.target),
                        )
                    })?;
                    Node::Param(self.merge_param(p)?)
                }
                Node::Block(b) => Node::Block(Rc::new(self.merge_block(b)?)),
                Node::Include(inc) => self.merge_include(inc)?,
                Node::If(f) => Node::If(Box::new(self.merge_if(f)?)),
                Node::Match(m) => Node::Match(Box::new(self.merge_match(m)?)),
                Node::Repeat(r) => Node::Repeat(Box::new(RepeatNode {
                    count: r.count.clone(),
                    body: self.merge_body(&r.body)?,
                })),
                other => other.clone(),
            };
            out.push(merged);
        }
        Ok(out)
    }

    fn merge_param(&mut self, p: &Parameter) -> Result<Parameter, LinkError> {
        let mut out = p.clone();
        if let Some(Apply::Named(n)) = &p.apply {
            let pair = self
                .pairs
                .get(n)
                .cloned()
                .ok_or_else(|| LinkError::new(LinkErrorKind::MissingPair, self.interner.resolve(*n)))?;
            out.apply = Some(Apply::Pair(pair));
        }
        Ok(out)
    }

    fn merge_include(&mut self, inc: &Include) -> Result<Node, LinkError> {
        match (&inc.predicate, &inc.target) {
            // No predicate: the include dissolves into its target.
            (None, IncludeTarget::Named(r)) => {
                let block = self.named_with_alias(r)?;
                debug!(block = self.interner.resolve(block.name), "inlined include");
                Ok(Node::Block(block))
            }
            (None, IncludeTarget::Inline(b)) => Ok(Node::Block(Rc::new(self.merge_block(b)?))),
            // Predicated: keep the name, the decoder resolves it when the
            // predicate passes. Gated self-reference is legal this way.
            (Some(_), IncludeTarget::Named(r)) => {
                if !self.src_blocks.contains_key(&r.target) {
                    return Err(LinkError::new(
                        LinkErrorKind::MissingBlock,
                        self.interner.resolve(r.target),
                    ));
                }
                Ok(Node::Include(Box::new(Include {
                    predicate: inc.predicate.clone(),
                    target: IncludeTarget::Named(r.clone()),
                    span: inc.span,
                })))
            }
            (Some(_), IncludeTarget::Inline(b)) => Ok(Node::Include(Box::new(Include {
                predicate: inc.predicate.clone(),
                target: IncludeTarget::Inline(Rc::new(self.merge_block(b)?)),
                span: inc.span,
            }))),
        }
    }

    fn merge_if(&mut self, f: &IfNode) -> Result<IfNode, LinkError> {
        let then = self.merge_body(&f.then)?;
        let otherwise = match &f.otherwise {
            Some(Node::If(inner)) => Some(Node::If(Box::new(self.merge_if(inner)?))),
            Some(node) => Some(self.merge_body(node)?),
            None => None,
        };
        Ok(IfNode {
            cond: f.cond.clone(),
            then,
            otherwise,
        })
    }

    fn merge_match(&mut self, m: &MatchNode) -> Result<MatchNode, LinkError> {
        let mut cases = Vec::with_capacity(m.cases.len());
        for c in &m.cases {
            cases.push(MatchCase {
                conds: c.conds.clone(),
                body: self.merge_body(&c.body)?,
            });
        }
        let default = match &m.default {
            Some(node) => Some(self.merge_body(node)?),
            None => None,
        };
        Ok(MatchNode {
            subject: m.subject.clone(),
            cases,
            default,
            span: m.span,
        })
    }

    /// Control-flow bodies: a reference here names a block.
    fn merge_body(&mut self, node: &Node) -> Result<Node, LinkError> {
        match node {
            Node::Block(b) => Ok(Node::Block(Rc::new(self.merge_block(b)?))),
            Node::Reference(r) => Ok(Node::Block(self.named_with_alias(r)?)),
            Node::If(f) => Ok(Node::If(Box::new(self.merge_if(f)?))),
            other => Ok(other.clone()),
        }
    }
}
