use std::{
    fs,
    io::{Cursor, Write},
    path::Path,
};

use exif::{Field, In, Tag};
use img_parts::{jpeg::Jpeg, png::Png, Bytes, ImageEXIF, ImageICC};
use tempfile::NamedTempFile;

use crate::{Error, Result};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

pub enum Container {
    Jpeg(Jpeg),
    Png(Png),
}

impl Container {
    pub fn read(path: &Path) -> Result<Container> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        Container::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Container> {
        let malformed = |e: img_parts::Error| Error::Container(format!("{}: {}", path.display(), e));
        if bytes.starts_with(JPEG_MAGIC) {
            Jpeg::from_bytes(Bytes::from(bytes))
                .map(Container::Jpeg)
                .map_err(malformed)
        } else if bytes.starts_with(PNG_MAGIC) {
            Png::from_bytes(Bytes::from(bytes))
                .map(Container::Png)
                .map_err(malformed)
        } else {
            Err(Error::UnsupportedFormat(path.to_path_buf()))
        }
    }

    pub fn format(&self) -> image::ImageFormat {
        match self {
            Container::Jpeg(_) => image::ImageFormat::Jpeg,
            Container::Png(_) => image::ImageFormat::Png,
        }
    }

    pub fn exif(&self) -> Option<Bytes> {
        match self {
            Container::Jpeg(jpeg) => jpeg.exif(),
            Container::Png(png) => png.exif(),
        }
    }

    pub fn set_exif(&mut self, exif: Option<Bytes>) {
        match self {
            Container::Jpeg(jpeg) => jpeg.set_exif(exif),
            Container::Png(png) => png.set_exif(exif),
        }
    }

    pub fn icc_profile(&self) -> Option<Bytes> {
        match self {
            Container::Jpeg(jpeg) => jpeg.icc_profile(),
            Container::Png(png) => png.icc_profile(),
        }
    }

    pub fn set_icc_profile(&mut self, profile: Option<Bytes>) {
        match self {
            Container::Jpeg(jpeg) => jpeg.set_icc_profile(profile),
            Container::Png(png) => png.set_icc_profile(profile),
        }
    }

    // Fields of unknown type and the offset tags the writer regenerates are
    // left out. A JPEG thumbnail travels as raw bytes.
    pub fn exif_fields(&self) -> Result<ExifFields> {
        let Some(raw) = self.exif() else {
            return Ok(ExifFields::default());
        };
        let exif = exif::Reader::new().read_raw(raw.to_vec())?;
        let thumbnail = thumbnail_jpeg(&exif);
        let fields = exif
            .fields()
            .filter(|field| match field.ifd_num {
                In::PRIMARY => true,
                In::THUMBNAIL => thumbnail.is_some(),
                _ => false,
            })
            .filter(|field| !matches!(field.value, exif::Value::Unknown(..)))
            .filter(|field| !is_structural(field.tag))
            .map(|field| Field {
                tag: field.tag,
                ifd_num: field.ifd_num,
                value: field.value.clone(),
            })
            .collect();
        Ok(ExifFields {
            fields,
            little_endian: exif.little_endian(),
            thumbnail,
        })
    }

    pub fn set_exif_fields(&mut self, exif: &ExifFields) -> Result<()> {
        if exif.primary().next().is_none() {
            self.set_exif(None);
            return Ok(());
        }
        let mut writer = exif::experimental::Writer::new();
        for field in &exif.fields {
            writer.push_field(field);
        }
        if let Some(jpeg) = &exif.thumbnail {
            writer.set_jpeg(jpeg, In::THUMBNAIL);
        }
        let mut buffer = Cursor::new(Vec::new());
        writer.write(&mut buffer, exif.little_endian)?;
        self.set_exif(Some(Bytes::from(buffer.into_inner())));
        Ok(())
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Container::Jpeg(jpeg) => jpeg.encoder().bytes(),
            Container::Png(png) => png.encoder().bytes(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExifFields {
    pub fields: Vec<Field>,
    pub little_endian: bool,
    pub thumbnail: Option<Vec<u8>>,
}

impl ExifFields {
    pub fn primary(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.ifd_num == In::PRIMARY)
    }

    pub fn get(&self, tag: Tag) -> Option<&Field> {
        self.primary().find(|f| f.tag == tag)
    }

    pub fn set(&mut self, tag: Tag, value: Option<exif::Value>) {
        self.fields
            .retain(|f| f.tag != tag || f.ifd_num != In::PRIMARY);
        if let Some(value) = value {
            self.fields.push(Field {
                tag,
                ifd_num: In::PRIMARY,
                value,
            });
        }
    }
}

fn thumbnail_jpeg(exif: &exif::Exif) -> Option<Vec<u8>> {
    let uint = |tag| {
        exif.get_field(tag, In::THUMBNAIL)
            .and_then(|f| f.value.get_uint(0))
            .map(|v| v as usize)
    };
    let offset = uint(Tag::JPEGInterchangeFormat)?;
    let length = uint(Tag::JPEGInterchangeFormatLength)?;
    exif.buf()
        .get(offset..offset.checked_add(length)?)
        .map(<[u8]>::to_vec)
}

fn is_structural(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::ExifIFDPointer
            | Tag::GPSInfoIFDPointer
            | Tag::InteropIFDPointer
            | Tag::JPEGInterchangeFormat
            | Tag::JPEGInterchangeFormatLength
            | Tag::StripOffsets
            | Tag::StripByteCounts
    )
}

/// Writes `bytes` to a fresh file next to `path` and renames it over `path`.
/// Until the rename the original stays byte-for-byte untouched.
pub fn replace_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    temp.write_all(bytes).map_err(|e| Error::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io(temp.path(), e))?;
    if let Some(permissions) = permissions {
        temp.as_file()
            .set_permissions(permissions)
            .map_err(|e| Error::io(temp.path(), e))?;
    }
    temp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{attach_gps, with_thumbnail, write_jpeg, write_png};
    use tempfile::tempdir;

    #[test]
    fn detects_formats() {
        let temp_dir = tempdir().unwrap();
        let jpeg = temp_dir.path().join("a.jpg");
        let png = temp_dir.path().join("b.png");
        write_jpeg(&jpeg, 8, 8);
        write_png(&png, 8, 8, [0, 0, 0, 255]);

        assert_eq!(Container::read(&jpeg).unwrap().format(), image::ImageFormat::Jpeg);
        assert_eq!(Container::read(&png).unwrap().format(), image::ImageFormat::Png);
    }

    #[test]
    fn rejects_unknown_format() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("notes.jpg");
        fs::write(&path, b"GIF89a not really").unwrap();

        assert!(matches!(
            Container::read(&path),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn exif_fields_survive_rewrite() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("a.jpg");
        write_jpeg(&path, 8, 8);
        attach_gps(&path, "N", [49, 0, 0], "E", [17, 0, 0]);

        let mut container = Container::read(&path).unwrap();
        let exif = container.exif_fields().unwrap();
        assert!(exif.get(Tag::GPSLatitude).is_some());
        container.set_exif_fields(&exif).unwrap();

        let again = container.exif_fields().unwrap();
        assert_eq!(exif.fields.len(), again.fields.len());
    }

    #[test]
    fn empty_field_list_drops_exif() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("a.png");
        write_png(&path, 8, 8, [0, 0, 0, 255]);
        attach_gps(&path, "N", [49, 0, 0], "E", [17, 0, 0]);

        let mut container = Container::read(&path).unwrap();
        assert!(container.exif().is_some());
        container.set_exif_fields(&ExifFields::default()).unwrap();

        assert!(container.exif().is_none());
    }

    #[test]
    fn atomic_replace_swaps_content() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("file.bin");
        fs::write(&path, b"old").unwrap();

        replace_atomically(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn thumbnail_survives_rewrite() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("a.jpg");
        write_jpeg(&path, 16, 16);
        with_thumbnail(&path);

        let mut container = Container::read(&path).unwrap();
        let exif = container.exif_fields().unwrap();
        container.set_exif_fields(&exif).unwrap();
        let again = Container::from_bytes(&path, container.into_bytes().to_vec())
            .unwrap()
            .exif_fields()
            .unwrap();

        assert_eq!(again.thumbnail, exif.thumbnail);
        assert!(again
            .fields
            .iter()
            .any(|f| f.ifd_num == In::THUMBNAIL && f.tag == Tag::Make));
    }
}
