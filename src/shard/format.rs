//! The on-disk shard layout (spec §6 "Shard file format"). Little-endian
//! throughout; a fixed header, a body of length-prefixed sections, and a
//! table-of-contents at the tail so a reader can mmap the file and jump
//! straight to the section it needs.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Illustrative but stable; any 4 bytes that won't collide with another
/// format would do (spec §6).
pub const MAGIC: [u8; 4] = [0x63, 0xf0, 0x1d, 0xde];

/// Format of the file itself. Bump when the header/TOC/section framing
/// changes in a way older readers can't cope with.
pub const FORMAT_VERSION: u32 = 1;

/// Search-time semantics version. Bump when what a shard's bytes *mean*
/// changes, even if the framing doesn't (spec §3 "index-feature version").
pub const FEATURE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionKind {
    Content = 1,
    Filenames = 2,
    TrigramPostings = 3,
    /// Per-document metadata table: offsets into `Content`/`Filenames`,
    /// symbol ranges, language, skip reason (JSON-encoded; see
    /// `shard::writer`).
    Documents = 4,
    BranchMasks = 5,
    RepositoryMetadata = 6,
}

impl SectionKind {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Content,
            2 => Self::Filenames,
            3 => Self::TrigramPostings,
            4 => Self::Documents,
            5 => Self::BranchMasks,
            6 => Self::RepositoryMetadata,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    pub kind: SectionKind,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("bad magic header")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedFormatVersion(u32),
    #[error("unknown section kind {0}")]
    UnknownSectionKind(u32),
    #[error("shard ordinal {0} exceeds the last representable ordinal")]
    ShardOrdinalOutOfRange(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn write_header(w: &mut impl Write, feature_version: u32) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u32::<LittleEndian>(feature_version)?;
    Ok(())
}

pub struct Header {
    pub format_version: u32,
    pub feature_version: u32,
}

pub fn read_header(r: &mut impl Read) -> Result<Header, FormatError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let format_version = r.read_u32::<LittleEndian>()?;
    if format_version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedFormatVersion(format_version));
    }
    let feature_version = r.read_u32::<LittleEndian>()?;
    Ok(Header {
        format_version,
        feature_version,
    })
}

/// Writes `(kind, offset, size)` triples terminated by a zero-kind sentinel.
pub fn write_toc(w: &mut impl Write, entries: &[TocEntry]) -> io::Result<()> {
    for entry in entries {
        w.write_u32::<LittleEndian>(entry.kind as u32)?;
        w.write_u64::<LittleEndian>(entry.offset)?;
        w.write_u64::<LittleEndian>(entry.size)?;
    }
    // sentinel
    w.write_u32::<LittleEndian>(0)?;
    w.write_u64::<LittleEndian>(0)?;
    w.write_u64::<LittleEndian>(0)?;
    Ok(())
}

pub fn read_toc(r: &mut impl Read) -> Result<Vec<TocEntry>, FormatError> {
    let mut entries = Vec::new();
    loop {
        let kind = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u64::<LittleEndian>()?;
        let size = r.read_u64::<LittleEndian>()?;
        if kind == 0 {
            break;
        }
        let kind = SectionKind::from_u32(kind).ok_or(FormatError::UnknownSectionKind(kind))?;
        entries.push(TocEntry { kind, offset, size });
    }
    Ok(entries)
}

/// A shard's last 8 bytes: the absolute offset at which its TOC begins, so a
/// reader can mmap the whole file and jump straight to the TOC without
/// having tracked section sizes while writing.
pub const FOOTER_LEN: u64 = 8;

pub fn write_footer(w: &mut impl Write, toc_offset: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(toc_offset)
}

pub fn read_footer(bytes: &[u8]) -> Result<u64, FormatError> {
    if (bytes.len() as u64) < FOOTER_LEN {
        return Err(FormatError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "file shorter than footer",
        )));
    }
    let tail = &bytes[bytes.len() - FOOTER_LEN as usize..];
    Ok((&tail[..]).read_u64::<LittleEndian>()?)
}
