// Parser and linker integration: schema text through the front half of
// the pipeline.

use std::io::Cursor;

use bitlayout::lexer::token::TokenKind;
use bitlayout::lexer::Lexer;
use bitlayout::parser::ast::{IncludeTarget, Node};
use bitlayout::span::SourceId;
use bitlayout::{
    Decoder, Error, FsResolver, LayoutEngine, LinkErrorKind, StringInterner, Value,
};

#[test]
fn scanning_twice_yields_identical_tokens() {
    let src = "data (\n a: uint 8 big # trailing note\n b: int 3\n echo \"x %[a]\"\n)\n";
    let mut interner = StringInterner::new();
    let first: Vec<TokenKind> = Lexer::new(src, SourceId(0), &mut interner)
        .tokenize()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    let second: Vec<TokenKind> = Lexer::new(src, SourceId(0), &mut interner)
        .tokenize()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(first, second);
}

#[test]
fn crlf_sources_parse_like_lf() {
    let engine = LayoutEngine::new();
    let lf = engine.load("data (\n a: uint 8\n)\n", "lf.lay").expect("lf");
    let crlf = engine
        .load("data (\r\n a: uint 8\r\n)\r\n", "crlf.lay")
        .expect("crlf");
    assert_eq!(lf.data.block.nodes.len(), crlf.data.block.nodes.len());
}

#[test]
fn parse_error_names_file_and_position() {
    let engine = LayoutEngine::new();
    let err = engine
        .parse("data (\n a: uint 8\n ???\n)\n", "bad.lay")
        .expect_err("should fail");
    assert!(err.message.contains("bad.lay"), "{}", err.message);
    assert!(err.message.contains("3:"), "{}", err.message);
}

#[test]
fn merged_tree_has_no_unpredicated_includes() {
    let engine = LayoutEngine::new();
    let program = engine
        .load(
            "block P (\n q: uint 8\n)\nblock R (\n include P\n)\ndata (\n include R\n f: uint 8\n include[f == 1] P\n)\n",
            "test.lay",
        )
        .expect("load");

    fn walk(nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::Reference(_) => panic!("unresolved reference survived the merge"),
                Node::Include(inc) => {
                    assert!(inc.predicate.is_some(), "unpredicated include survived");
                    if let IncludeTarget::Inline(b) = &inc.target {
                        walk(&b.nodes);
                    }
                }
                Node::Block(b) => walk(&b.nodes),
                Node::Repeat(r) => {
                    if let Node::Block(b) = &r.body {
                        walk(&b.nodes);
                    }
                }
                _ => {}
            }
        }
    }
    walk(&program.data.block.nodes);
}

#[test]
fn link_error_categories() {
    let engine = LayoutEngine::new();
    let missing_block = engine.load("data (\n include Nope\n)\n", "t.lay");
    match missing_block {
        Err(Error::Link(e)) => assert_eq!(e.kind, LinkErrorKind::MissingBlock),
        other => panic!("expected link error, got {:?}", other.err()),
    }
    let missing_data = engine.load("block P (\n q: uint 8\n)\n", "t.lay");
    match missing_data {
        Err(Error::Link(e)) => assert_eq!(e.kind, LinkErrorKind::MissingData),
        other => panic!("expected link error, got {:?}", other.err()),
    }
}

#[test]
fn includes_resolve_through_the_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    let defs = dir.path().join("defs.lay");
    std::fs::write(&defs, "enum E (\n 0 = no\n 1 = yes\n)\nblock P (\n q: uint 8, E\n)\n")
        .expect("write include");

    let schema = format!(
        "include (\n \"{}\"\n)\ndata (\n include P\n)\n",
        defs.display()
    );
    let engine = LayoutEngine::with_resolver(FsResolver);
    let program = engine.load(&schema, "main.lay").expect("load");
    let collected = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let handle = std::rc::Rc::clone(&collected);
    let mut decoder = Decoder::new(&program);
    decoder.on_pass(move |fields, interner| {
        for f in fields {
            handle
                .borrow_mut()
                .push((interner.resolve(f.id).to_string(), f.eng().clone()));
        }
    });
    decoder.run(Cursor::new(vec![1u8])).expect("run");
    drop(decoder);
    let seen = collected.borrow().clone();
    assert_eq!(seen, vec![("q".to_string(), Value::Str("yes".into()))]);
}

#[test]
fn include_of_missing_file_is_a_parse_error() {
    let engine = LayoutEngine::with_resolver(FsResolver);
    let err = engine
        .parse(
            "include (\n \"/definitely/not/here.lay\"\n)\ndata (\n a: uint 8\n)\n",
            "main.lay",
        )
        .expect_err("should fail");
    assert!(err.message.contains("include"), "{}", err.message);
}

#[test]
fn noop_resolver_rejects_includes() {
    let engine = LayoutEngine::new();
    let err = engine
        .parse("include (\n other\n)\ndata (\n a: uint 8\n)\n", "main.lay")
        .expect_err("should fail");
    assert!(err.message.contains("not available"), "{}", err.message);
}

#[test]
fn tuple_is_an_alias_for_sexp() {
    let engine = LayoutEngine::new();
    let program = engine
        .load(
            "data (\n a: uint 8\n print raw as tuple with a\n)\n",
            "t.lay",
        )
        .expect("load");
    // Rendering through the decoder proves the dispatch table accepts it
    let mut decoder = Decoder::new(&program);
    decoder.set_stdout(Box::new(std::io::sink()));
    decoder.run(Cursor::new(vec![1u8])).expect("run");
}

#[test]
fn schema_description_round() {
    let engine = LayoutEngine::new();
    let schema = engine
        .parse(
            "block hdr (\n a: uint 16\n b: bytes 4\n)\ndata (\n include hdr\n)\n",
            "t.lay",
        )
        .expect("parse");
    let stats = bitlayout::describe::block_stats(&schema.ast, &schema.interner);
    let hdr = stats.iter().find(|s| s.name == "hdr").expect("hdr");
    assert_eq!(hdr.bits, 16 + 32);
    assert_eq!(hdr.params, 2);

    let mut out = Vec::new();
    bitlayout::describe::dump(&schema.ast, &schema.interner, &mut out).expect("dump");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("block(name=hdr)"), "{}", text);
    assert!(text.contains("include(predicate=true, target=hdr)"), "{}", text);
}
