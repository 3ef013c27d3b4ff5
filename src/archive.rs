// ABOUTME: Reader for the PostgreSQL custom-format dump archive
// ABOUTME: Parses the header, table of contents, and per-entry data blocks

use crate::error::PipelineError;
use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const MAGIC: &[u8; 5] = b"PGDMP";
const FORMAT_CUSTOM: u8 = 1;
const BLK_DATA: u8 = 1;
const OFFSET_POS_SET: u8 = 2;

/// Oldest and newest archive layout versions this reader understands.
/// pg_dump 9.x through 16 write versions inside this window.
const MIN_VERSION: (u8, u8) = (1, 12);
const MAX_VERSION: (u8, u8) = (1, 15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
}

/// One table-of-contents entry of a custom archive.
#[derive(Debug, Clone)]
pub struct TocEntry {
    pub dump_id: i64,
    pub had_dumper: bool,
    pub tag: Option<String>,
    pub desc: Option<String>,
    pub namespace: Option<String>,
    pub copy_stmt: Option<String>,
    /// Byte offset of this entry's data block, when the archive was written
    /// to a seekable destination and the offset was patched in.
    pub offset: Option<u64>,
}

impl TocEntry {
    pub fn is_table_data(&self) -> bool {
        self.desc.as_deref() == Some("TABLE DATA")
    }
}

/// Decoded row data of one `TABLE DATA` entry.
#[derive(Debug)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// An opened custom-format archive: parsed catalog plus a seekable handle
/// for pulling individual data blocks on demand.
#[derive(Debug)]
pub struct Archive {
    file: Codec,
    pub version: (u8, u8, u8),
    pub compression: Compression,
    pub dbname: Option<String>,
    pub entries: Vec<TocEntry>,
}

impl Archive {
    /// Parse the archive header and table of contents. Data blocks are not
    /// touched until [`Archive::table_data`] asks for one.
    pub fn load(path: &Path) -> Result<Archive> {
        let file = File::open(path)
            .with_context(|| format!("failed to open dump archive {}", path.display()))?;
        let mut codec = Codec {
            r: BufReader::new(file),
            int_size: 4,
            off_size: 8,
        };

        let mut magic = [0u8; 5];
        codec.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("missing PGDMP magic; not a custom-format dump"));
        }

        let vmaj = codec.read_u8()?;
        let vmin = codec.read_u8()?;
        let vrev = codec.read_u8()?;
        let version = (vmaj, vmin, vrev);
        if (vmaj, vmin) < MIN_VERSION || (vmaj, vmin) > MAX_VERSION {
            return Err(invalid(&format!(
                "unsupported archive version {}.{}.{} (supported: {}.{} through {}.{})",
                vmaj, vmin, vrev, MIN_VERSION.0, MIN_VERSION.1, MAX_VERSION.0, MAX_VERSION.1
            )));
        }

        codec.int_size = codec.read_u8()? as usize;
        codec.off_size = codec.read_u8()? as usize;
        if codec.int_size == 0 || codec.int_size > 8 || codec.off_size == 0 || codec.off_size > 8 {
            return Err(invalid("implausible integer/offset sizes in header"));
        }

        let format = codec.read_u8()?;
        if format != FORMAT_CUSTOM {
            return Err(invalid(&format!(
                "archive format byte is {}, expected custom (1)",
                format
            )));
        }

        // pg_dump 16 (layout 1.15) replaced the zlib level integer with a
        // compression method byte.
        let compression = if (vmaj, vmin) >= (1, 15) {
            match codec.read_u8()? {
                0 => Compression::None,
                1 => Compression::Zlib,
                other => {
                    return Err(invalid(&format!(
                        "unsupported compression method {} (only none and gzip)",
                        other
                    )))
                }
            }
        } else if codec.read_int()? == 0 {
            Compression::None
        } else {
            Compression::Zlib
        };

        // Creation timestamp: sec, min, hour, mday, mon, year, isdst.
        for _ in 0..7 {
            codec.read_int()?;
        }

        let dbname = codec.read_string()?;
        let _remote_version = codec.read_string()?;
        let _dump_version = codec.read_string()?;

        let toc_count = codec.read_int()?;
        if toc_count < 0 {
            return Err(invalid("negative entry count in table of contents"));
        }

        let mut entries = Vec::with_capacity(toc_count as usize);
        for _ in 0..toc_count {
            entries.push(read_entry(&mut codec, version)?);
        }

        Ok(Archive {
            file: codec,
            version,
            compression,
            dbname,
            entries,
        })
    }

    /// Decode the row data of a `TABLE DATA` entry.
    pub fn table_data(&mut self, entry: &TocEntry) -> Result<TableData> {
        let offset = entry.offset.ok_or_else(|| {
            PipelineError::InvalidArchive(format!(
                "entry '{}' has no stored data offset; archives written to \
                 non-seekable output are not supported",
                entry.tag.as_deref().unwrap_or("?")
            ))
        })?;

        self.file.r.seek(SeekFrom::Start(offset))?;
        let block_type = self.file.read_u8()?;
        if block_type != BLK_DATA {
            return Err(invalid(&format!(
                "expected a data block at offset {}, found block type {}",
                offset, block_type
            )));
        }
        let dump_id = self.file.read_int()?;
        if dump_id != entry.dump_id {
            return Err(invalid(&format!(
                "data block at offset {} belongs to dump id {}, expected {}",
                offset, dump_id, entry.dump_id
            )));
        }

        // Length-prefixed chunks, terminated by a zero length.
        let mut raw = Vec::new();
        loop {
            let len = self.file.read_int()?;
            if len <= 0 {
                break;
            }
            let start = raw.len();
            raw.resize(start + len as usize, 0);
            self.file.read_exact(&mut raw[start..])?;
        }

        let text = match self.compression {
            Compression::None => raw,
            Compression::Zlib => {
                let mut decoded = Vec::new();
                ZlibDecoder::new(raw.as_slice())
                    .read_to_end(&mut decoded)
                    .context("failed to decompress data block")?;
                decoded
            }
        };

        let copy_stmt = entry.copy_stmt.as_deref().ok_or_else(|| {
            PipelineError::InvalidArchive(format!(
                "table data entry '{}' carries no COPY statement",
                entry.tag.as_deref().unwrap_or("?")
            ))
        })?;
        let columns = parse_copy_columns(copy_stmt)?;
        let rows = parse_copy_text(&String::from_utf8_lossy(&text));

        Ok(TableData { columns, rows })
    }
}

fn read_entry(codec: &mut Codec, version: (u8, u8, u8)) -> Result<TocEntry> {
    let dump_id = codec.read_int()?;
    let had_dumper = codec.read_int()? != 0;
    let _table_oid = codec.read_string()?;
    let _oid = codec.read_string()?;
    let tag = codec.read_string()?;
    let desc = codec.read_string()?;
    let _section = codec.read_int()?;
    let _defn = codec.read_string()?;
    let _drop_stmt = codec.read_string()?;
    let copy_stmt = codec.read_string()?;
    let namespace = codec.read_string()?;
    let _tablespace = codec.read_string()?;
    if (version.0, version.1) >= (1, 14) {
        let _tableam = codec.read_string()?;
    }
    let _owner = codec.read_string()?;
    let _with_oids = codec.read_string()?;

    // Dependency list, terminated by a null string.
    while codec.read_string()?.is_some() {}

    let data_state = codec.read_u8()?;
    let raw_offset = codec.read_offset()?;
    let offset = (data_state == OFFSET_POS_SET).then_some(raw_offset);

    Ok(TocEntry {
        dump_id,
        had_dumper,
        tag,
        desc,
        namespace,
        copy_stmt,
        offset,
    })
}

/// Column list of a `COPY "schema"."table" ("a", "b") FROM stdin;` statement.
pub fn parse_copy_columns(copy_stmt: &str) -> Result<Vec<String>> {
    let open = copy_stmt
        .find('(')
        .ok_or_else(|| PipelineError::InvalidArchive(format!(
            "COPY statement has no column list: {}",
            copy_stmt.trim()
        )))?;
    let close = copy_stmt
        .rfind(')')
        .filter(|end| *end > open)
        .ok_or_else(|| PipelineError::InvalidArchive(format!(
            "unterminated column list in COPY statement: {}",
            copy_stmt.trim()
        )))?;

    let mut columns = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = copy_stmt[open + 1..close].chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                // Doubled quote inside a quoted identifier.
                chars.next();
                current.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                columns.push(std::mem::take(&mut current).trim().to_string());
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !columns.is_empty() {
        columns.push(current.trim().to_string());
    }
    Ok(columns)
}

/// Decode COPY text rows: tab-separated fields, `\N` null, backslash escapes,
/// terminated by a `\.` line.
pub fn parse_copy_text(text: &str) -> Vec<Vec<Option<String>>> {
    let mut rows = Vec::new();
    for line in text.split('\n') {
        if line == "\\." {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let row = line
            .split('\t')
            .map(|field| {
                if field == "\\N" {
                    None
                } else {
                    Some(unescape_copy_field(field))
                }
            })
            .collect();
        rows.push(row);
    }
    rows
}

fn unescape_copy_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('\\') => out.push('\\'),
            Some(d @ '0'..='7') => {
                let mut value = d as u32 - '0' as u32;
                for _ in 0..2 {
                    match chars.peek() {
                        Some(n @ '0'..='7') => {
                            value = value * 8 + (*n as u32 - '0' as u32);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                if let Some(decoded) = char::from_u32(value) {
                    out.push(decoded);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn invalid(msg: &str) -> anyhow::Error {
    PipelineError::InvalidArchive(msg.to_string()).into()
}

/// Low-level decoder for the archive's integer, string and offset encodings.
#[derive(Debug)]
struct Codec {
    r: BufReader<File>,
    int_size: usize,
    off_size: usize,
}

impl Codec {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.r
            .read_exact(buf)
            .context("unexpected end of dump archive")
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Signed integer: one sign byte, then `int_size` little-endian bytes.
    fn read_int(&mut self) -> Result<i64> {
        let negative = self.read_u8()? != 0;
        let mut value: u64 = 0;
        for i in 0..self.int_size {
            let byte = self.read_u8()? as u64;
            value |= byte << (8 * i);
        }
        Ok(if negative {
            -(value as i64)
        } else {
            value as i64
        })
    }

    /// Length-prefixed string; a negative length is the null sentinel.
    fn read_string(&mut self) -> Result<Option<String>> {
        let len = self.read_int()?;
        if len < 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// File offset: `off_size` little-endian bytes (flag byte read by caller).
    fn read_offset(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        for i in 0..self.off_size {
            let byte = self.read_u8()? as u64;
            value |= byte << (8 * i);
        }
        Ok(value)
    }
}
