use super::{text, ParseLimits, ParserKind};
use crate::config::ScopeConfig;
use crate::document::Document;
use crate::scanner;
use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

const WRAP_WIDTH: usize = 120;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("valid title regex"));
static META: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta regex"));
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\b(name|content)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("valid attribute regex")
});

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeadInfo {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    keywords: Option<String>,
}

/// Parse an HTML file. When `folder` is given, the text of every parsable
/// file below it is appended to the contents; those files may fail silently.
pub fn parse(
    path: &Path,
    folder: Option<&Path>,
    config: &ScopeConfig,
    limits: ParseLimits,
) -> Result<Document> {
    let html = read_html(path, limits)?;
    let head = head_info(&html);

    let mut contents = html_to_text(&html)?;
    for extra in [&head.title, &head.author, &head.description, &head.keywords]
        .into_iter()
        .flatten()
    {
        contents.push('\n');
        contents.push_str(extra);
    }

    if let Some(folder) = folder {
        fold_folder(folder, config, limits, &mut contents);
    }

    let mut doc = Document::new(path, ParserKind::Html);
    doc.title = head.title;
    doc.authors = head.author.into_iter().collect();
    doc.contents = contents;
    doc.last_modified = scanner::modified_ms(path).unwrap_or_default();
    Ok(doc)
}

fn read_html(path: &Path, limits: ParseLimits) -> Result<String> {
    let len = fs::metadata(path)
        .with_context(|| format!("failed to stat file: {}", path.display()))?
        .len();
    if len > limits.max_text_bytes {
        bail!("file exceeds {} bytes", limits.max_text_bytes);
    }
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len as usize)
        .map_err(|err| anyhow!("cannot allocate {len} bytes: {err}"))?;
    fs::File::open(path)
        .and_then(|file| file.take(len).read_to_end(&mut bytes))
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn html_to_text(html: &str) -> Result<String> {
    html2text::from_read(html.as_bytes(), WRAP_WIDTH).map_err(|err| anyhow!("{err}"))
}

fn head_info(html: &str) -> HeadInfo {
    let mut info = HeadInfo {
        title: TITLE
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| clean(m.as_str()))
            .filter(|t| !t.is_empty()),
        ..HeadInfo::default()
    };

    for tag in META.find_iter(html) {
        let mut name = None;
        let mut content = None;
        for caps in ATTR.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| clean(m.as_str()));
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => name = value.map(|v| v.to_ascii_lowercase()),
                _ => content = value,
            }
        }
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            continue;
        };
        let slot = match name.as_deref() {
            Some("author") => &mut info.author,
            Some("description") => &mut info.description,
            Some("keywords") => &mut info.keywords,
            _ => continue,
        };
        slot.get_or_insert(content);
    }
    info
}

/// Head text with entities decoded and whitespace collapsed.
fn clean(raw: &str) -> String {
    let decoded = html_to_text(raw).unwrap_or_else(|_| raw.to_string());
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_folder(folder: &Path, config: &ScopeConfig, limits: ParseLimits, contents: &mut String) {
    let walker = WalkDir::new(folder)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file());

    for entry in walker {
        let path = entry.path();
        let text = match config.parser_for(path) {
            Some(ParserKind::Html) => read_html(path, limits).and_then(|html| html_to_text(&html)),
            Some(ParserKind::Text) => text::parse(path, limits).map(|doc| doc.contents),
            None => continue,
        };
        match text {
            Ok(text) => {
                contents.push('\n');
                contents.push_str(&text);
            }
            Err(err) => log::debug!("ignoring {} in html folder: {err:#}", path.display()),
        }
    }
}
