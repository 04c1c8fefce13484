// Schema description utilities: tree dump and per-block size statistics

use std::io::{self, Write};

use crate::name::StringInterner;
use crate::parser::ast::{
    Apply, Ast, BinOp, Block, ConstantKey, EchoPart, Expr, ExprKind, IncludeTarget, Node, Pair,
    SizeSpec, UnaryOp,
};

/// Fixed-size footprint of one top-level block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStats {
    pub name: String,
    pub bits: u64,
    pub bytes: u64,
    pub params: usize,
}

/// Sum the statically-sized parameters directly inside each named block
/// (and the data block). Ident-sized and nested fields are not counted.
pub fn block_stats(ast: &Ast, interner: &StringInterner) -> Vec<BlockStats> {
    let mut out = Vec::new();
    if let Some(data) = &ast.data {
        out.push(stats_of(&data.block, interner));
    }
    for block in &ast.blocks {
        out.push(stats_of(block, interner));
    }
    out
}

fn stats_of(block: &Block, interner: &StringInterner) -> BlockStats {
    let mut bits = 0u64;
    let mut params = 0usize;
    for node in &block.nodes {
        if let Node::Param(p) = node {
            if let Some(SizeSpec::Bits(n)) = p.size {
                bits += if p.kind.sized_in_bytes() {
                    n as u64 * 8
                } else {
                    n as u64
                };
                params += 1;
            }
        }
    }
    BlockStats {
        name: interner.resolve(block.name).to_string(),
        bits,
        bytes: bits / 8,
        params,
    }
}

/// Print the declaration tree, one node per line, indented by nesting.
pub fn dump(ast: &Ast, interner: &StringInterner, w: &mut dyn Write) -> io::Result<()> {
    for pair in &ast.pairs {
        dump_pair(pair, interner, w, 0)?;
    }
    for p in &ast.declares {
        writeln!(
            w,
            "declare(name={}, type={}, size={})",
            interner.resolve(p.name),
            p.kind.as_str(),
            size_string(&p.size, interner)
        )?;
    }
    for block in &ast.blocks {
        writeln!(w, "block(name={}) (", interner.resolve(block.name))?;
        dump_nodes(&block.nodes, interner, w, 1)?;
        writeln!(w, ")")?;
    }
    if let Some(data) = &ast.data {
        writeln!(w, "data(files={}) (", data.files.join(", "))?;
        dump_nodes(&data.block.nodes, interner, w, 1)?;
        writeln!(w, ")")?;
    }
    Ok(())
}

fn indent(w: &mut dyn Write, level: usize) -> io::Result<()> {
    for _ in 0..level {
        w.write_all(b"  ")?;
    }
    Ok(())
}

fn dump_nodes(
    nodes: &[Node],
    interner: &StringInterner,
    w: &mut dyn Write,
    level: usize,
) -> io::Result<()> {
    for node in nodes {
        dump_node(node, interner, w, level)?;
    }
    Ok(())
}

fn dump_node(
    node: &Node,
    interner: &StringInterner,
    w: &mut dyn Write,
    level: usize,
) -> io::Result<()> {
    indent(w, level)?;
    match node {
        Node::Param(p) => {
            writeln!(
                w,
                "parameter(name={}, type={}, size={})",
                interner.resolve(p.name),
                p.kind.as_str(),
                size_string(&p.size, interner)
            )?;
            if let Some(Apply::Pair(pair)) = &p.apply {
                dump_pair(pair, interner, w, level + 1)?;
            }
        }
        Node::Reference(r) => {
            writeln!(w, "reference(name={})", interner.resolve(r.target))?;
        }
        Node::Block(b) => {
            writeln!(w, "block(name={}) (", interner.resolve(b.name))?;
            dump_nodes(&b.nodes, interner, w, level + 1)?;
            indent(w, level)?;
            writeln!(w, ")")?;
        }
        Node::Include(inc) => {
            let predicate = inc
                .predicate
                .as_ref()
                .map(|e| expr_string(e, interner))
                .unwrap_or_else(|| "true".to_string());
            let target = match &inc.target {
                IncludeTarget::Named(r) => interner.resolve(r.target).to_string(),
                IncludeTarget::Inline(b) => interner.resolve(b.name).to_string(),
            };
            writeln!(w, "include(predicate={}, target={})", predicate, target)?;
        }
        Node::If(f) => {
            writeln!(w, "if(expr={}) (", expr_string(&f.cond, interner))?;
            dump_node(&f.then, interner, w, level + 1)?;
            if let Some(alt) = &f.otherwise {
                indent(w, level)?;
                writeln!(w, ") else (")?;
                dump_node(alt, interner, w, level + 1)?;
            }
            indent(w, level)?;
            writeln!(w, ")")?;
        }
        Node::Match(m) => {
            let subject = m
                .subject
                .as_ref()
                .map(|e| expr_string(e, interner))
                .unwrap_or_default();
            writeln!(w, "match(expr={}) (", subject)?;
            for case in &m.cases {
                indent(w, level + 1)?;
                let conds: Vec<String> =
                    case.conds.iter().map(|c| expr_string(c, interner)).collect();
                writeln!(w, "case(cond={}) (", conds.join(", "))?;
                dump_node(&case.body, interner, w, level + 2)?;
                indent(w, level + 1)?;
                writeln!(w, ")")?;
            }
            if let Some(alt) = &m.default {
                indent(w, level + 1)?;
                writeln!(w, "case(cond=default) (")?;
                dump_node(alt, interner, w, level + 2)?;
                indent(w, level + 1)?;
                writeln!(w, ")")?;
            }
            indent(w, level)?;
            writeln!(w, ")")?;
        }
        Node::Repeat(r) => {
            writeln!(w, "repeat(count={}) (", expr_string(&r.count, interner))?;
            dump_node(&r.body, interner, w, level + 1)?;
            indent(w, level)?;
            writeln!(w, ")")?;
        }
        Node::Break(e) => writeln!(w, "break(predicate={})", expr_string(e, interner))?,
        Node::Continue(e) => writeln!(w, "continue(predicate={})", expr_string(e, interner))?,
        Node::Let(l) => writeln!(
            w,
            "let(name={}, expr={})",
            interner.resolve(l.name),
            expr_string(&l.value, interner)
        )?,
        Node::Del(d) => {
            let names: Vec<&str> = d.names.iter().map(|n| interner.resolve(*n)).collect();
            writeln!(w, "del(names={})", names.join(", "))?;
        }
        Node::Seek(s) => writeln!(
            w,
            "seek(offset={}, absolute={})",
            expr_string(&s.offset, interner),
            s.absolute
        )?,
        Node::Peek(e) => writeln!(w, "peek(count={})", expr_string(e, interner))?,
        Node::Exit(e) => match &e.code {
            crate::parser::ast::ExitCode::Code(c) => writeln!(w, "exit(code={})", c)?,
            crate::parser::ast::ExitCode::Field(n) => {
                writeln!(w, "exit(code={})", interner.resolve(*n))?
            }
        },
        Node::Print(p) => {
            let values: Vec<&str> = p.values.iter().map(|n| interner.resolve(*n)).collect();
            writeln!(w, "print(values={})", values.join(", "))?;
        }
        Node::Echo(e) => {
            let mut template = String::new();
            for part in &e.parts {
                match part {
                    EchoPart::Lit(s) => template.push_str(s),
                    EchoPart::Expr(x) => {
                        template.push_str("%[");
                        template.push_str(&expr_string(x, interner));
                        template.push(']');
                    }
                }
            }
            writeln!(w, "echo(template={})", template)?;
        }
        Node::Copy(c) => writeln!(w, "copy(count={})", expr_string(&c.count, interner))?,
    }
    Ok(())
}

fn dump_pair(
    pair: &Pair,
    interner: &StringInterner,
    w: &mut dyn Write,
    level: usize,
) -> io::Result<()> {
    indent(w, level)?;
    writeln!(
        w,
        "{}(name={}) (",
        pair.kind.as_str(),
        interner.resolve(pair.name)
    )?;
    for c in &pair.constants {
        indent(w, level + 1)?;
        let key = match &c.key {
            ConstantKey::Name(n) => interner.resolve(*n).to_string(),
            ConstantKey::Int(v) => v.to_string(),
            ConstantKey::Float(v) => v.to_string(),
        };
        writeln!(w, "constant(key={}, value={})", key, expr_string(&c.value, interner))?;
    }
    indent(w, level)?;
    writeln!(w, ")")
}

fn size_string(size: &Option<SizeSpec>, interner: &StringInterner) -> String {
    match size {
        None => "1".to_string(),
        Some(SizeSpec::Bits(n)) => n.to_string(),
        Some(SizeSpec::Field(f)) => interner.resolve(*f).to_string(),
    }
}

/// Parenthesized rendering of an expression for dump output.
pub fn expr_string(expr: &Expr, interner: &StringInterner) -> String {
    match &expr.kind {
        ExprKind::Int(v) => v.to_string(),
        ExprKind::Float(v) => v.to_string(),
        ExprKind::Str(s) => format!("\"{}\"", s),
        ExprKind::Bool(b) => b.to_string(),
        ExprKind::Ident(n) => interner.resolve(*n).to_string(),
        ExprKind::Internal(n) => format!("${}", interner.resolve(*n)),
        ExprKind::Member { field, attr } => {
            format!("{}.{}", interner.resolve(*field), interner.resolve(*attr))
        }
        ExprKind::Unary { op, operand } => {
            let glyph = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            };
            format!("{}({})", glyph, expr_string(operand, interner))
        }
        ExprKind::Binary { op, lhs, rhs } => format!(
            "({} {} {})",
            expr_string(lhs, interner),
            binop_glyph(*op),
            expr_string(rhs, interner)
        ),
        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => format!(
            "({} ? {} : {})",
            expr_string(cond, interner),
            expr_string(then, interner),
            expr_string(otherwise, interner)
        ),
        ExprKind::Assign { target, value } => format!(
            "({} = {})",
            interner.resolve(*target),
            expr_string(value, interner)
        ),
    }
}

fn binop_glyph(op: BinOp) -> &'static str {
    op.as_str()
}
