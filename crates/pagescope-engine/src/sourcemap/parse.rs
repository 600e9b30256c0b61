//! Source map (revision 3) parsing and position lookup.
//!
//! Supports regular maps and index maps (`sections`) with inline `map`
//! objects. Positions in the public API are 1-based lines and columns.

use serde::Deserialize;
use thiserror::Error;

use super::vlq::{self, VlqError};

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("source map is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported source map version {0}")]
    UnsupportedVersion(u32),
    #[error("bad VLQ in generated line {line}: {source}")]
    Vlq { line: usize, source: VlqError },
    #[error("segment with {len} fields in generated line {line}")]
    InvalidSegment { line: usize, len: usize },
    #[error("{what} index out of range in generated line {line}")]
    OutOfRange { what: &'static str, line: usize },
    #[error("index map sections referencing external maps are not supported")]
    ExternalSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    sources: Vec<Option<String>>,
    #[serde(default)]
    sources_content: Vec<Option<String>>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    mappings: String,
    #[serde(default)]
    sections: Option<Vec<RawSection>>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    offset: RawOffset,
    #[serde(default)]
    map: Option<Box<RawSourceMap>>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOffset {
    line: u32,
    column: u32,
}

/// Original-source half of a mapping segment (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OriginalRef {
    source: u32,
    line: u32,
    column: u32,
    name: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    generated_column: u32,
    original: Option<OriginalRef>,
}

/// A position in original source, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition<'a> {
    pub source_index: usize,
    pub source: &'a str,
    pub line: u32,
    pub column: u32,
    pub name: Option<&'a str>,
}

/// A parsed, immutable source map.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    file: Option<String>,
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    names: Vec<String>,
    /// Segments per generated line, sorted by generated column.
    lines: Vec<Vec<Mapping>>,
}

impl SourceMap {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_slice(strip_xssi_prefix(bytes))?;
        Self::from_raw(raw)
    }

    pub fn parse(text: &str) -> Result<Self, SourceMapError> {
        Self::from_slice(text.as_bytes())
    }

    fn from_raw(raw: RawSourceMap) -> Result<Self, SourceMapError> {
        if let Some(version) = raw.version {
            if version != 3 {
                return Err(SourceMapError::UnsupportedVersion(version));
            }
        }
        match raw.sections {
            Some(sections) => Self::from_sections(raw.file, sections),
            None => Self::from_flat(raw),
        }
    }

    fn from_flat(raw: RawSourceMap) -> Result<Self, SourceMapError> {
        let root = raw.source_root.unwrap_or_default();
        let sources: Vec<String> = raw
            .sources
            .into_iter()
            .map(|s| apply_source_root(&root, &s.unwrap_or_default()))
            .collect();
        let mut sources_content = raw.sources_content;
        sources_content.resize(sources.len(), None);
        let lines = decode_mappings(&raw.mappings, sources.len(), raw.names.len())?;
        Ok(Self {
            file: raw.file,
            sources,
            sources_content,
            names: raw.names,
            lines,
        })
    }

    fn from_sections(file: Option<String>, sections: Vec<RawSection>) -> Result<Self, SourceMapError> {
        let mut merged = SourceMap {
            file,
            ..SourceMap::default()
        };
        for section in sections {
            if section.url.is_some() {
                return Err(SourceMapError::ExternalSection);
            }
            let Some(raw) = section.map else {
                continue;
            };
            let child = Self::from_raw(*raw)?;
            let source_offset = merged.sources.len() as u32;
            let name_offset = merged.names.len() as u32;
            merged.sources.extend(child.sources);
            merged.sources_content.extend(child.sources_content);
            merged.names.extend(child.names);

            for (i, line) in child.lines.into_iter().enumerate() {
                let target = section.offset.line as usize + i;
                if merged.lines.len() <= target {
                    merged.lines.resize_with(target + 1, Vec::new);
                }
                let column_offset = if i == 0 { section.offset.column } else { 0 };
                merged.lines[target].extend(line.into_iter().map(|m| Mapping {
                    generated_column: m.generated_column + column_offset,
                    original: m.original.map(|o| OriginalRef {
                        source: o.source + source_offset,
                        name: o.name.map(|n| n + name_offset),
                        ..o
                    }),
                }));
            }
        }
        for line in &mut merged.lines {
            line.sort_by_key(|m| m.generated_column);
        }
        Ok(merged)
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn mapping_count(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }

    /// Map a generated position to original source.
    ///
    /// Uses the closest segment at or before `column` on the same generated
    /// line; segments without an original position yield `None`.
    pub fn original_position(&self, line: u32, column: u32) -> Option<OriginalPosition<'_>> {
        let segments = self.lines.get(line.checked_sub(1)? as usize)?;
        let col = column.saturating_sub(1);
        let idx = segments.partition_point(|m| m.generated_column <= col);
        let mapping = segments.get(idx.checked_sub(1)?)?;
        let original = mapping.original?;
        let source_index = original.source as usize;
        Some(OriginalPosition {
            source_index,
            source: self.sources.get(source_index)?.as_str(),
            line: original.line + 1,
            column: original.column + 1,
            name: original
                .name
                .and_then(|n| self.names.get(n as usize))
                .map(String::as_str),
        })
    }

    /// Reverse lookup: the generated position for an original position.
    ///
    /// Picks the segment on the original line with the greatest original
    /// column at or before `column`, earliest generated position first.
    pub fn generated_position(&self, source: &str, line: u32, column: u32) -> Option<(u32, u32)> {
        let source_index = self.find_source(source)? as u32;
        let want_line = line.checked_sub(1)?;
        let want_col = column.saturating_sub(1);

        let mut best: Option<(u32, u32, u32)> = None; // (orig col, gen line, gen col)
        for (gen_line, segments) in self.lines.iter().enumerate() {
            for m in segments {
                let Some(o) = m.original else { continue };
                if o.source != source_index || o.line != want_line || o.column > want_col {
                    continue;
                }
                let candidate = (o.column, gen_line as u32, m.generated_column);
                best = match best {
                    Some(b) if b.0 > candidate.0 => Some(b),
                    Some(b) if b.0 == candidate.0 && (b.1, b.2) <= (candidate.1, candidate.2) => {
                        Some(b)
                    }
                    _ => Some(candidate),
                };
            }
        }
        best.map(|(_, l, c)| (l + 1, c + 1))
    }

    /// Index of a source by exact name, falling back to a path-suffix match
    /// so `src/App.tsx` finds `webpack:///./src/App.tsx`.
    pub fn find_source(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.sources.iter().position(|s| s == name) {
            return Some(idx);
        }
        let wanted = name.trim_start_matches("./");
        self.sources.iter().position(|s| {
            s.strip_suffix(wanted)
                .is_some_and(|prefix| prefix.is_empty() || prefix.ends_with('/'))
        })
    }

    /// Embedded content for a source, if the map carries it.
    pub fn source_content(&self, source_index: usize) -> Option<&str> {
        self.sources_content.get(source_index)?.as_deref()
    }

    /// One line (1-based) of embedded source content.
    pub fn source_line(&self, source_index: usize, line: u32) -> Option<&str> {
        let content = self.source_content(source_index)?;
        content.lines().nth(line.checked_sub(1)? as usize)
    }
}

/// Maps served with an anti-XSSI prefix start with `)]}'`.
fn strip_xssi_prefix(bytes: &[u8]) -> &[u8] {
    if bytes.starts_with(b")]}'") {
        match bytes.iter().position(|b| *b == b'\n') {
            Some(nl) => &bytes[nl + 1..],
            None => &bytes[4..],
        }
    } else {
        bytes
    }
}

fn apply_source_root(root: &str, source: &str) -> String {
    if root.is_empty() || source.contains("://") || source.starts_with('/') {
        source.to_string()
    } else if root.ends_with('/') {
        format!("{root}{source}")
    } else {
        format!("{root}/{source}")
    }
}

fn decode_mappings(
    mappings: &str,
    source_count: usize,
    name_count: usize,
) -> Result<Vec<Vec<Mapping>>, SourceMapError> {
    let mut lines = Vec::new();
    // Everything but the generated column accumulates across lines.
    let (mut source, mut orig_line, mut orig_col, mut name) = (0i64, 0i64, 0i64, 0i64);

    for (line_no, line_text) in mappings.split(';').enumerate() {
        let mut generated_column = 0i64;
        let mut segments = Vec::new();

        for segment in line_text.split(',').filter(|s| !s.is_empty()) {
            let fields = vlq::decode_segment(segment).map_err(|source| SourceMapError::Vlq {
                line: line_no,
                source,
            })?;
            if !matches!(fields.len(), 1 | 4 | 5) {
                return Err(SourceMapError::InvalidSegment {
                    line: line_no,
                    len: fields.len(),
                });
            }

            generated_column += fields[0];
            let out_of_range = |what| SourceMapError::OutOfRange {
                what,
                line: line_no,
            };
            let gen_column =
                u32::try_from(generated_column).map_err(|_| out_of_range("generated column"))?;

            let original = if fields.len() >= 4 {
                source += fields[1];
                orig_line += fields[2];
                orig_col += fields[3];
                if source < 0 || source as usize >= source_count {
                    return Err(out_of_range("source"));
                }
                let (Ok(line), Ok(column)) = (u32::try_from(orig_line), u32::try_from(orig_col))
                else {
                    return Err(out_of_range("original position"));
                };
                let name_ref = if fields.len() == 5 {
                    name += fields[4];
                    if name < 0 || name as usize >= name_count {
                        return Err(out_of_range("name"));
                    }
                    Some(name as u32)
                } else {
                    None
                };
                Some(OriginalRef {
                    source: source as u32,
                    line,
                    column,
                    name: name_ref,
                })
            } else {
                None
            };

            segments.push(Mapping {
                generated_column: gen_column,
                original,
            });
        }

        segments.sort_by_key(|m| m.generated_column);
        lines.push(segments);
    }

    Ok(lines)
}
