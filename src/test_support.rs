use std::path::Path;

use std::io::Cursor;

use exif::{Field, In, Rational, Tag, Value};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use crate::container::{replace_atomically, Container};

pub(crate) fn write_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    });
    DynamicImage::ImageRgb8(img).save(path).unwrap();
}

pub(crate) fn write_png(path: &Path, width: u32, height: u32, color: [u8; 4]) {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    DynamicImage::ImageRgba8(img).save(path).unwrap();
}

fn dms(values: [u32; 3]) -> Value {
    Value::Rational(
        values
            .iter()
            .map(|v| Rational { num: *v, denom: 1 })
            .collect(),
    )
}

/// Adds GPS tags to whatever EXIF the file already carries.
pub(crate) fn attach_gps(
    path: &Path,
    lat_ref: &str,
    lat: [u32; 3],
    lon_ref: &str,
    lon: [u32; 3],
) {
    let mut container = Container::read(path).unwrap();
    let mut exif = container.exif_fields().unwrap();
    let ascii = |s: &str| Value::Ascii(vec![s.as_bytes().to_vec()]);
    exif.set(Tag::GPSLatitudeRef, Some(ascii(lat_ref)));
    exif.set(Tag::GPSLatitude, Some(dms(lat)));
    exif.set(Tag::GPSLongitudeRef, Some(ascii(lon_ref)));
    exif.set(Tag::GPSLongitude, Some(dms(lon)));
    container.set_exif_fields(&exif).unwrap();
    replace_atomically(path, &container.into_bytes()).unwrap();
}

/// Gives the file a camera make in both IFDs and a small JPEG thumbnail.
pub(crate) fn with_thumbnail(path: &Path) {
    let mut thumbnail = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])))
        .write_to(&mut Cursor::new(&mut thumbnail), ImageFormat::Jpeg)
        .unwrap();

    let mut container = Container::read(path).unwrap();
    let mut exif = container.exif_fields().unwrap();
    let make = Value::Ascii(vec![b"Kamera".to_vec()]);
    exif.set(Tag::Make, Some(make.clone()));
    exif.fields.push(Field {
        tag: Tag::Make,
        ifd_num: In::THUMBNAIL,
        value: make,
    });
    exif.thumbnail = Some(thumbnail);
    container.set_exif_fields(&exif).unwrap();
    replace_atomically(path, &container.into_bytes()).unwrap();
}
