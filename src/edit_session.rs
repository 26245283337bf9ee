use std::{fs, io::Cursor, path::Path, process::Command};

use image::ImageFormat;
use img_parts::{
    png::{Png, PngChunk},
    Bytes,
};
use tracing::{debug, info};

use crate::{
    config::EditorConfig,
    polygon_metadata::{Polygon, PolygonPayload, SENTINEL},
    Error, Result,
};

const TEXT_CHUNK: [u8; 4] = *b"tEXt";
const INTERNATIONAL_TEXT_CHUNK: [u8; 4] = *b"iTXt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorOptions {
    pub point_marker_size: u32,
    pub stroke_width: u32,
    pub hide_extra_panel: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        EditorOptions {
            point_marker_size: 6,
            stroke_width: 2,
            hide_extra_panel: true,
        }
    }
}

pub trait PolygonEditor {
    /// Blocks until the user is done. `Ok(true)` means the edit was accepted
    /// and the file holds the result.
    fn edit(&mut self, file: &Path, options: &EditorOptions) -> Result<bool>;
}

pub struct CommandEditor {
    program: String,
    args: Vec<String>,
}

impl CommandEditor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> CommandEditor {
        CommandEditor {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Option<CommandEditor> {
        let program = config.program.as_ref()?;
        Some(CommandEditor::new(program.clone(), config.args.clone()))
    }
}

impl PolygonEditor for CommandEditor {
    fn edit(&mut self, file: &Path, options: &EditorOptions) -> Result<bool> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--point-size")
            .arg(options.point_marker_size.to_string())
            .arg("--stroke-width")
            .arg(options.stroke_width.to_string());
        if options.hide_extra_panel {
            command.arg("--hide-panel");
        }
        let status = command
            .arg(file)
            .status()
            .map_err(|e| Error::Editor(format!("cannot run {:?}: {}", self.program, e)))?;
        debug!("{} exited with {}", self.program, status);
        Ok(status.success())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Accepted(Vec<[f64; 2]>),
    Cancelled,
}

fn malformed(path: &Path, e: img_parts::Error) -> Error {
    Error::Container(format!("{}: {}", path.display(), e))
}

// Drops any polygon chunk and, given points, inserts a fresh one right
// after the header.
fn set_polygon_chunk(png: &mut Png, points: Option<&[[f64; 2]]>) -> Result<()> {
    let chunks = png.chunks_mut();
    chunks.retain(|chunk| polygon_chunk_text(chunk).is_none());
    let Some(points) = points else {
        return Ok(());
    };
    let json = serde_json::to_string(&PolygonPayload {
        points: points.to_vec(),
    })?;
    let mut contents = SENTINEL.as_bytes().to_vec();
    contents.push(0);
    contents.extend_from_slice(json.as_bytes());

    let at = chunks
        .iter()
        .position(|chunk| chunk.kind() == *b"IHDR")
        .map_or(0, |i| i + 1);
    chunks.insert(at, PngChunk::new(TEXT_CHUNK, Bytes::from(contents)));
    Ok(())
}

fn polygon_chunk_text(chunk: &PngChunk) -> Option<String> {
    let contents = chunk.contents();
    let (keyword, rest) = split_nul(contents)?;
    if keyword != SENTINEL.as_bytes() {
        return None;
    }
    match chunk.kind() {
        TEXT_CHUNK => Some(String::from_utf8_lossy(rest).into_owned()),
        INTERNATIONAL_TEXT_CHUNK => {
            let (&compressed, rest) = rest.split_first()?;
            if compressed != 0 {
                debug!("skipping compressed iTXt polygon chunk");
                return None;
            }
            let (_, rest) = rest.split_first()?;
            let (_, rest) = split_nul(rest)?;
            let (_, text) = split_nul(rest)?;
            Some(String::from_utf8_lossy(text).into_owned())
        }
        _ => None,
    }
}

fn split_nul(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let nul = bytes.iter().position(|b| *b == 0)?;
    Some((&bytes[..nul], &bytes[nul + 1..]))
}

pub fn export_intermediate(source: &Path, polygon: Option<&Polygon>, dest: &Path) -> Result<()> {
    let decoded = image::open(source)?;
    let mut bytes = Vec::new();
    decoded.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    let mut png = Png::from_bytes(Bytes::from(bytes)).map_err(|e| malformed(dest, e))?;
    set_polygon_chunk(&mut png, polygon.map(Polygon::points))?;
    fs::write(dest, png.encoder().bytes()).map_err(|e| Error::io(dest, e))
}

/// Replaces the polygon chunk of an existing intermediate file. For editors
/// implemented in-process.
pub fn write_intermediate_points(path: &Path, points: &[[f64; 2]]) -> Result<()> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let mut png = Png::from_bytes(Bytes::from(bytes)).map_err(|e| malformed(path, e))?;
    set_polygon_chunk(&mut png, Some(points))?;
    fs::write(path, png.encoder().bytes()).map_err(|e| Error::io(path, e))
}

pub fn read_intermediate(path: &Path) -> Result<Option<Vec<[f64; 2]>>> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let png = Png::from_bytes(Bytes::from(bytes)).map_err(|e| malformed(path, e))?;
    let Some(text) = png.chunks().iter().rev().find_map(polygon_chunk_text) else {
        return Ok(None);
    };
    let payload: PolygonPayload = serde_json::from_str(&text)?;
    Ok(Some(payload.points))
}

/// Lets the user edit the polygon of `source`. The intermediate file lives
/// in the temp directory and is deleted on every return path.
pub fn open_for_edit(
    source: &Path,
    current: Option<&Polygon>,
    editor: &mut dyn PolygonEditor,
    options: &EditorOptions,
) -> Result<EditOutcome> {
    let intermediate = tempfile::Builder::new()
        .prefix("aoimap-edit-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| Error::io(std::env::temp_dir(), e))?;
    export_intermediate(source, current, intermediate.path())?;

    if !editor.edit(intermediate.path(), options)? {
        info!("polygon edit of {} cancelled", source.display());
        return Ok(EditOutcome::Cancelled);
    }
    match read_intermediate(intermediate.path())? {
        Some(points) => {
            info!(
                "polygon edit of {} accepted with {} points",
                source.display(),
                points.len()
            );
            Ok(EditOutcome::Accepted(points))
        }
        None => Err(Error::Editor(format!(
            "edited file carries no {} chunk",
            SENTINEL
        ))),
    }
}
