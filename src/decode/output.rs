// Output sinks and record formatters
//
// Sinks open on first use and are cached by the decoder's block path, so
// the same logical destination can produce different physical files in
// different block contexts. `-` and the empty string mean stdout (stderr
// for echo); /dev/null discards. Records are CRLF-terminated; csv quoting
// follows RFC 4180 with doubled inner quotes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::env::Field;
use crate::error::DecodeError;
use crate::name::StringInterner;
use crate::parser::ast::{Format, Method};

struct OpenFile {
    name: String,
    file: File,
}

/// Writer registry owned by one decoder. Files close when the registry is
/// dropped.
pub struct SinkRegistry<'w> {
    files: FxHashMap<String, OpenFile>,
    stdout: Box<dyn Write + 'w>,
    stderr: Box<dyn Write + 'w>,
    discard: io::Sink,
}

impl Default for SinkRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'w> SinkRegistry<'w> {
    pub fn new() -> Self {
        Self {
            files: FxHashMap::default(),
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
            discard: io::sink(),
        }
    }

    pub fn set_stdout(&mut self, w: Box<dyn Write + 'w>) {
        self.stdout = w;
    }

    pub fn set_stderr(&mut self, w: Box<dyn Write + 'w>) {
        self.stderr = w;
    }

    /// Writer for `file` in the block context `key`. None and `-`/empty
    /// route to the standard sinks; a cached file is reopened when the
    /// requested name changed since last use.
    pub(crate) fn open(
        &mut self,
        key: &str,
        file: Option<&str>,
        echo: bool,
    ) -> Result<&mut dyn Write, DecodeError> {
        let file = match file {
            None | Some("") | Some("-") => {
                return Ok(if echo {
                    self.stderr.as_mut()
                } else {
                    self.stdout.as_mut()
                });
            }
            Some("/dev/null") => return Ok(&mut self.discard),
            Some(f) => f,
        };
        let reopen = match self.files.get(key) {
            Some(open) => open.name != file,
            None => true,
        };
        if reopen {
            self.files.remove(key);
            if let Some(dir) = Path::new(file).parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)
                        .map_err(|e| DecodeError::new(format!("{}: {}", file, e)))?;
                }
            }
            let handle =
                File::create(file).map_err(|e| DecodeError::new(format!("{}: {}", file, e)))?;
            debug!(path = file, context = key, "opened output sink");
            self.files.insert(
                key.to_string(),
                OpenFile {
                    name: file.to_string(),
                    file: handle,
                },
            );
        }
        match self.files.get_mut(key) {
            Some(open) => Ok(&mut open.file),
            None => Err(DecodeError::new(format!("{}: sink not open", file))),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        self.stderr.flush()?;
        for open in self.files.values_mut() {
            open.file.flush()?;
        }
        Ok(())
    }
}

/// Write one record for the given format/method pair.
pub(crate) fn write_record(
    w: &mut dyn Write,
    format: Format,
    method: Method,
    fields: &[Field],
    interner: &StringInterner,
) -> io::Result<()> {
    match (format, method) {
        (Format::Csv, Method::Raw) => csv_row(w, fields, |f| f.raw.format_raw(true)),
        (Format::Csv, Method::Eng) => csv_row(w, fields, |f| f.eng().format_raw(true)),
        (Format::Csv, Method::Both) => csv_both(w, fields),
        (Format::Csv, Method::Debug) => csv_debug(w, fields, interner),
        (Format::Sexp, Method::Raw) => sexp_row(w, fields, |f| f.raw.format_raw(false)),
        (Format::Sexp, Method::Eng) => sexp_row(w, fields, |f| f.eng().format_raw(false)),
        (Format::Sexp, Method::Both) => sexp_both(w, fields),
        (Format::Sexp, Method::Debug) => sexp_debug(w, fields, interner),
    }
}

fn block_name<'a>(f: &Field, interner: &'a StringInterner) -> &'a str {
    f.block.map(|b| interner.resolve(b)).unwrap_or("")
}

fn csv_row(
    w: &mut dyn Write,
    fields: &[Field],
    render: impl Fn(&Field) -> String,
) -> io::Result<()> {
    let mut line = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push('"');
        line.push_str(&render(f));
        line.push('"');
    }
    line.push_str("\r\n");
    w.write_all(line.as_bytes())
}

fn csv_both(w: &mut dyn Write, fields: &[Field]) -> io::Result<()> {
    let mut line = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push('"');
        line.push_str(&f.raw.format_raw(true));
        line.push_str("\",\"");
        line.push_str(&f.eng().format_raw(true));
        line.push('"');
    }
    line.push_str("\r\n");
    w.write_all(line.as_bytes())
}

/// One row per field: byte offset, bit offset, block, id, length, raw, eng.
fn csv_debug(w: &mut dyn Write, fields: &[Field], interner: &StringInterner) -> io::Result<()> {
    for f in fields {
        let line = format!(
            "{},{},{},{},{},{},{}\r\n",
            f.pos / 8,
            f.pos,
            block_name(f, interner),
            interner.resolve(f.id),
            f.len,
            f.raw.format_raw(true),
            f.eng().format_raw(true),
        );
        w.write_all(line.as_bytes())?;
    }
    Ok(())
}

fn sexp_row(
    w: &mut dyn Write,
    fields: &[Field],
    render: impl Fn(&Field) -> String,
) -> io::Result<()> {
    let mut line = String::from("(");
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&render(f));
    }
    line.push_str(")\r\n");
    w.write_all(line.as_bytes())
}

fn sexp_both(w: &mut dyn Write, fields: &[Field]) -> io::Result<()> {
    let mut line = String::from("(");
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push('(');
        line.push_str(&f.raw.format_raw(false));
        line.push(' ');
        line.push_str(&f.eng().format_raw(false));
        line.push(')');
    }
    line.push_str(")\r\n");
    w.write_all(line.as_bytes())
}

/// One outer list of 6-tuples: (bit-offset block id length raw eng).
fn sexp_debug(w: &mut dyn Write, fields: &[Field], interner: &StringInterner) -> io::Result<()> {
    let mut line = String::from("(");
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&format!(
            "({} {} {} {} {} {})",
            f.pos,
            block_name(f, interner),
            interner.resolve(f.id),
            f.len,
            f.raw.format_raw(false),
            f.eng().format_raw(false),
        ));
    }
    line.push_str(")\r\n");
    w.write_all(line.as_bytes())
}
