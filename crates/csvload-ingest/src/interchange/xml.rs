//! `<csv><headers><header/>…</headers><rows><row><cell/>…</row></rows></csv>`

use crate::table::ParsedTable;
use csvload_common::{LoadError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    None,
    Header,
    Cell,
}

fn read_from<R: BufRead>(mut reader: Reader<R>) -> Result<ParsedTable> {
    let mut table = ParsedTable::default();
    let mut row: Option<Vec<String>> = None;
    let mut capture = Capture::None;
    let mut text = String::new();
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            LoadError::xml(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"csv" => saw_root = true,
                b"header" => {
                    capture = Capture::Header;
                    text.clear();
                },
                b"row" => row = Some(Vec::new()),
                b"cell" => {
                    capture = Capture::Cell;
                    text.clear();
                },
                _ => {},
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"csv" => saw_root = true,
                b"header" => table.headers.push(String::new()),
                b"cell" => {
                    if let Some(cells) = row.as_mut() {
                        cells.push(String::new());
                    }
                },
                b"row" => table.rows.push(Vec::new()),
                _ => {},
            },
            Event::Text(t) if capture != Capture::None => {
                let unescaped = t.unescape().map_err(|e| LoadError::xml(e.to_string()))?;
                text.push_str(&unescaped);
            },
            Event::CData(c) if capture != Capture::None => {
                text.push_str(&String::from_utf8_lossy(&c));
            },
            Event::End(e) => match e.name().as_ref() {
                b"header" if capture == Capture::Header => {
                    table.headers.push(std::mem::take(&mut text));
                    capture = Capture::None;
                },
                b"cell" if capture == Capture::Cell => {
                    if let Some(cells) = row.as_mut() {
                        cells.push(std::mem::take(&mut text));
                    }
                    capture = Capture::None;
                },
                b"row" => {
                    if let Some(cells) = row.take() {
                        table.rows.push(cells);
                    }
                },
                _ => {},
            },
            Event::Eof => break,
            // Whitespace between elements, comments, declarations
            _ => {},
        }
        buf.clear();
    }

    if !saw_root {
        return Err(LoadError::xml("missing <csv> root element"));
    }
    Ok(table)
}

pub fn parse_xml(text: &str) -> Result<ParsedTable> {
    read_from(Reader::from_reader(text.as_bytes()))
}

/// Parse a document already held in memory, e.g. after decompression
pub fn from_slice(bytes: &[u8]) -> Result<ParsedTable> {
    read_from(Reader::from_reader(bytes))
}

pub fn read_xml(path: impl AsRef<Path>) -> Result<ParsedTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoadError::from_open(path, e))?;
    read_from(Reader::from_reader(BufReader::new(file)))
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| LoadError::xml(e.to_string()))
}

fn emit_leaf<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return emit(writer, Event::Empty(BytesStart::new(name)));
    }
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(value)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Serialize `table` into any writer
pub fn write_to<W: Write>(out: W, table: &ParsedTable) -> Result<W> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(&mut writer, Event::Start(BytesStart::new("csv")))?;

    emit(&mut writer, Event::Start(BytesStart::new("headers")))?;
    for header in &table.headers {
        emit_leaf(&mut writer, "header", header)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("headers")))?;

    emit(&mut writer, Event::Start(BytesStart::new("rows")))?;
    for row in &table.rows {
        emit(&mut writer, Event::Start(BytesStart::new("row")))?;
        for cell in row {
            emit_leaf(&mut writer, "cell", cell)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("row")))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("rows")))?;
    emit(&mut writer, Event::End(BytesEnd::new("csv")))?;

    let mut out = writer.into_inner();
    out.write_all(b"\n")?;
    Ok(out)
}

pub fn write_xml(path: impl AsRef<Path>, table: &ParsedTable) -> Result<()> {
    let out = BufWriter::new(File::create(path.as_ref())?);
    write_to(out, table)?.flush()?;
    Ok(())
}
