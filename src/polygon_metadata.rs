use std::{ops::Range, path::Path};

use exif::{Field, Tag, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    container::{replace_atomically, Container},
    Error, Result,
};

pub const SENTINEL: &str = "AOI_POLYGON";

const FIELDS: [Tag; 2] = [Tag::ImageDescription, Tag::UserComment];

const ASCII_PREFIX: &[u8; 8] = b"ASCII\0\0\0";
const UNICODE_PREFIX: &[u8; 8] = b"UNICODE\0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PolygonPayload {
    pub points: Vec<[f64; 2]>,
}

/// At least three finite vertices in image pixel coordinates. Closure is
/// implied, the first point is not repeated at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    points: Vec<[f64; 2]>,
}

impl Polygon {
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn into_points(self) -> Vec<[f64; 2]> {
        self.points
    }

    pub fn to_payload(&self) -> Result<String> {
        let json = serde_json::to_string(&PolygonPayload {
            points: self.points.clone(),
        })?;
        Ok(format!("{}={}", SENTINEL, json))
    }
}

impl TryFrom<Vec<[f64; 2]>> for Polygon {
    type Error = Error;

    fn try_from(points: Vec<[f64; 2]>) -> Result<Polygon> {
        if points.len() < 3 {
            return Err(Error::DegeneratePolygon(points.len()));
        }
        if let Some(index) = points
            .iter()
            .position(|[x, y]| !x.is_finite() || !y.is_finite())
        {
            return Err(Error::InvalidPoint(index));
        }
        Ok(Polygon { points })
    }
}

/// Byte ranges of every `AOI_POLYGON=<object>` occurrence in `text`.
///
/// The object is matched by brace depth, skipping braces inside JSON
/// strings, so nested structures are never cut short. An occurrence whose
/// braces never balance is not a payload.
pub fn find_payloads(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut resume = 0;
    for (start, _) in text.match_indices(SENTINEL) {
        if start < resume {
            continue;
        }
        let mut pos = skip_whitespace(bytes, start + SENTINEL.len());
        if bytes.get(pos) != Some(&b'=') {
            continue;
        }
        pos = skip_whitespace(bytes, pos + 1);
        if bytes.get(pos) != Some(&b'{') {
            continue;
        }
        if let Some(end) = object_end(bytes, pos) {
            found.push(start..end);
            resume = end;
        }
    }
    found
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

fn object_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Removes every payload. Only the whitespace touching a payload goes with
/// it; text left on both sides of one is kept on separate lines.
pub fn strip_payloads(text: &str) -> String {
    let ranges = find_payloads(text);
    if ranges.is_empty() {
        return text.to_string();
    }
    let mut pieces = Vec::with_capacity(ranges.len() + 1);
    let mut cursor = 0;
    for range in ranges {
        pieces.push(&text[cursor..range.start]);
        cursor = range.end;
    }
    pieces.push(&text[cursor..]);

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let piece = if i > 0 { piece.trim_start() } else { piece };
            if i < last {
                piece.trim_end()
            } else {
                piece
            }
        })
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replaces any payload in `text` with exactly one for `polygon`, on its own
/// line after the remaining text.
pub fn embed_payload(text: &str, polygon: &Polygon) -> Result<String> {
    let rest = strip_payloads(text);
    let payload = polygon.to_payload()?;
    if rest.is_empty() {
        Ok(payload)
    } else {
        Ok(format!("{}\n{}", rest, payload))
    }
}

pub fn extract_payload(text: &str) -> Option<Polygon> {
    let range = find_payloads(text).pop()?;
    let chunk = &text[range];
    let json = chunk[SENTINEL.len()..].trim_start().strip_prefix('=')?;
    match serde_json::from_str::<PolygonPayload>(json) {
        Ok(payload) => Polygon::try_from(payload.points).ok(),
        Err(e) => {
            debug!("ignoring unparsable payload: {}", e);
            None
        }
    }
}

fn field_text(field: &Field, little_endian: bool) -> String {
    match &field.value {
        Value::Ascii(strings) => strings
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect::<Vec<_>>()
            .join(""),
        Value::Undefined(bytes, _) => decode_user_comment(bytes, little_endian),
        _ => String::new(),
    }
}

fn decode_user_comment(bytes: &[u8], little_endian: bool) -> String {
    let (prefix, body) = if bytes.len() >= 8 {
        bytes.split_at(8)
    } else {
        (&[][..], bytes)
    };
    let text = if prefix == UNICODE_PREFIX {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| {
                if little_endian {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(body).into_owned()
    };
    text.trim_end_matches(['\0', ' ']).to_string()
}

fn encode_user_comment(text: &str, little_endian: bool) -> Vec<u8> {
    if text.is_ascii() {
        let mut bytes = ASCII_PREFIX.to_vec();
        bytes.extend_from_slice(text.as_bytes());
        return bytes;
    }
    let mut bytes = UNICODE_PREFIX.to_vec();
    for unit in text.encode_utf16() {
        if little_endian {
            bytes.extend_from_slice(&unit.to_le_bytes());
        } else {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
    }
    bytes
}

fn text_value(tag: Tag, text: &str, little_endian: bool) -> Value {
    if tag == Tag::UserComment {
        Value::Undefined(encode_user_comment(text, little_endian), 0)
    } else {
        Value::Ascii(vec![text.as_bytes().to_vec()])
    }
}

pub fn read_from(container: &Container) -> Result<Option<Polygon>> {
    let exif = container.exif_fields()?;
    for tag in FIELDS {
        let polygon = exif
            .get(tag)
            .and_then(|f| extract_payload(&field_text(f, exif.little_endian)));
        if polygon.is_some() {
            return Ok(polygon);
        }
        debug!("no polygon in {}", tag);
    }
    Ok(None)
}

/// Rewrites both designated fields in memory: stripped of old payloads and,
/// given a polygon, carrying one fresh payload. A field left empty is
/// dropped. Returns false, leaving the container alone, when neither field
/// would change.
pub fn embed_into(container: &mut Container, polygon: Option<&Polygon>) -> Result<bool> {
    let mut exif = container.exif_fields()?;
    let mut changed = false;
    for tag in FIELDS {
        let current = exif
            .get(tag)
            .map(|f| field_text(f, exif.little_endian))
            .unwrap_or_default();
        let updated = match polygon {
            Some(polygon) => embed_payload(&current, polygon)?,
            None => strip_payloads(&current),
        };
        if updated == current {
            continue;
        }
        changed = true;
        let value = (!updated.is_empty()).then(|| text_value(tag, &updated, exif.little_endian));
        exif.set(tag, value);
    }
    if changed {
        container.set_exif_fields(&exif)?;
    }
    Ok(changed)
}

pub fn read(path: &Path) -> Result<Option<Polygon>> {
    read_from(&Container::read(path)?)
}

pub fn write(path: &Path, polygon: &Polygon) -> Result<()> {
    let mut container = Container::read(path)?;
    if !embed_into(&mut container, Some(polygon))? {
        debug!("{} already holds this polygon", path.display());
        return Ok(());
    }
    replace_atomically(path, &container.into_bytes())?;
    info!(
        "stored {}-point polygon in {}",
        polygon.points().len(),
        path.display()
    );
    Ok(())
}

pub fn remove(path: &Path) -> Result<()> {
    let mut container = Container::read(path)?;
    if !embed_into(&mut container, None)? {
        debug!("no polygon to remove from {}", path.display());
        return Ok(());
    }
    replace_atomically(path, &container.into_bytes())?;
    info!("removed polygon from {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stored {
    Written(Polygon),
    Removed,
}

pub fn store(path: &Path, points: &[[f64; 2]]) -> Result<Stored> {
    match Polygon::try_from(points.to_vec()) {
        Ok(polygon) => {
            write(path, &polygon)?;
            Ok(Stored::Written(polygon))
        }
        Err(Error::DegeneratePolygon(_)) => {
            remove(path)?;
            Ok(Stored::Removed)
        }
        Err(e) => Err(e),
    }
}
