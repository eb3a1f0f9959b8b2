use super::{ParseLimits, ParserKind};
use crate::document::Document;
use crate::scanner;
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

const SNIFF_BYTES: usize = 4096;

/// What reading a supposed text file turned up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRead {
    Text(String),
    Binary,
    TooLarge(u64),
}

pub fn parse(path: &Path, limits: ParseLimits) -> Result<Document> {
    let contents = match read_text(path, limits.max_text_bytes)? {
        TextRead::Text(contents) => contents,
        TextRead::Binary => bail!("binary content in text file"),
        TextRead::TooLarge(len) => {
            bail!("file of {len} bytes exceeds {} bytes", limits.max_text_bytes)
        }
    };

    let mut doc = Document::new(path, ParserKind::Text);
    doc.contents = contents;
    doc.last_modified = scanner::modified_ms(path).unwrap_or_default();
    Ok(doc)
}

/// Read a whole text file of at most `max_bytes`. The head is sniffed first
/// so binaries are rejected early, and the buffer is reserved fallibly so a
/// huge file cannot abort the process. Invalid UTF-8 is decoded lossily.
pub fn read_text(path: &Path, max_bytes: u64) -> Result<TextRead> {
    let len = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if len > max_bytes {
        return Ok(TextRead::TooLarge(len));
    }
    let len = usize::try_from(len).map_err(|_| anyhow!("{len} bytes do not fit in memory"))?;

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|err| anyhow!("cannot allocate {len} bytes: {err}"))?;

    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let head_len = SNIFF_BYTES.min(len) as u64;
    file.by_ref()
        .take(head_len)
        .read_to_end(&mut buffer)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if looks_binary(&buffer) {
        return Ok(TextRead::Binary);
    }

    file.take((len - buffer.len()) as u64)
        .read_to_end(&mut buffer)
        .with_context(|| format!("failed reading {}", path.display()))?;

    Ok(TextRead::Text(match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }))
}

/// NUL bytes, or more than 10% control characters other than whitespace.
pub fn looks_binary(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    if head.contains(&0) {
        return true;
    }
    let control = head
        .iter()
        .filter(|&&b| b < 9 || (b > 13 && b < 32))
        .count();
    control * 10 > head.len()
}
