use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
    process::Command,
    sync::OnceLock,
};

use regex::Regex;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    latitude: f64,
    longitude: f64,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Option<GeoCoordinate> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(GeoCoordinate {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

/// The letter sets hemisphere markers are written in.
///
/// EXIF reference fields use the compass letters, where `S` is south. The
/// reference-map naming convention uses the secondary-language letters, where
/// `S` is north (sever) and `J` south (jih). Both accept `V`/`Z` for east and
/// west (vychod, zapad) next to `E`/`W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Exif,
    FileName,
}

impl Hemisphere {
    pub fn parse(letter: char, alphabet: Alphabet) -> Option<Hemisphere> {
        let hemisphere = match (letter.to_ascii_uppercase(), alphabet) {
            ('N', _) => Hemisphere::North,
            ('S', Alphabet::Exif) => Hemisphere::South,
            ('S', Alphabet::FileName) => Hemisphere::North,
            ('J', _) => Hemisphere::South,
            ('E' | 'V', _) => Hemisphere::East,
            ('W' | 'Z', _) => Hemisphere::West,
            _ => return None,
        };
        Some(hemisphere)
    }

    fn is_latitude(self) -> bool {
        matches!(self, Hemisphere::North | Hemisphere::South)
    }

    fn sign(self) -> f64 {
        match self {
            Hemisphere::South | Hemisphere::West => -1.0,
            Hemisphere::North | Hemisphere::East => 1.0,
        }
    }
}

pub fn dms_to_decimal(deg: f64, min: f64, sec: f64) -> f64 {
    deg + min / 60.0 + sec / 3600.0
}

// Applies the hemisphere signs to unsigned magnitudes. Fails when the
// markers are swapped (a longitude letter on the latitude and vice versa).
fn signed_coordinate(
    latitude: f64,
    lat_ref: Hemisphere,
    longitude: f64,
    lon_ref: Hemisphere,
) -> Option<GeoCoordinate> {
    if !lat_ref.is_latitude() || lon_ref.is_latitude() {
        return None;
    }
    GeoCoordinate::new(
        lat_ref.sign() * latitude.abs(),
        lon_ref.sign() * longitude.abs(),
    )
}

pub trait CoordinateSource {
    fn name(&self) -> &'static str;

    fn locate(&self, path: &Path) -> Option<GeoCoordinate>;
}

pub struct Resolver {
    sources: Vec<Box<dyn CoordinateSource>>,
}

impl Resolver {
    pub fn new(sources: Vec<Box<dyn CoordinateSource>>) -> Resolver {
        Resolver { sources }
    }

    pub fn for_photos(config: &Config) -> Resolver {
        let mut sources: Vec<Box<dyn CoordinateSource>> = Vec::new();
        if config.use_exiftool {
            sources.push(Box::new(ExiftoolSource));
        }
        sources.push(Box::new(ExifGpsSource));
        Resolver::new(sources)
    }

    pub fn for_reference_maps(config: &Config) -> Resolver {
        let mut resolver = Resolver::for_photos(config);
        resolver.sources.push(Box::new(FileNameSource));
        resolver
    }

    pub fn resolve(&self, path: &Path) -> Option<GeoCoordinate> {
        for source in &self.sources {
            match source.locate(path) {
                Some(coordinate) => {
                    debug!("{}: {} via {}", path.display(), coordinate, source.name());
                    return Some(coordinate);
                }
                None => debug!("{}: no coordinates via {}", path.display(), source.name()),
            }
        }
        None
    }
}

// Much slower than the in-process parser, but understands more containers.
pub struct ExiftoolSource;

impl CoordinateSource for ExiftoolSource {
    fn name(&self) -> &'static str {
        "exiftool"
    }

    fn locate(&self, path: &Path) -> Option<GeoCoordinate> {
        let output = match Command::new("exiftool")
            .args(["-json", "-n"])
            .args([
                "-EXIF:GPSLatitude",
                "-EXIF:GPSLatitudeRef",
                "-EXIF:GPSLongitude",
                "-EXIF:GPSLongitudeRef",
            ])
            .arg(path)
            .output()
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!("exiftool exited with {}", output.status);
                return None;
            }
            Err(e) => {
                debug!("exiftool unavailable: {}", e);
                return None;
            }
        };
        coordinate_from_exiftool_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Reads exiftool's JSON record. Magnitudes come unsigned from the EXIF
/// tags and the reference letters are applied here, so the secondary
/// letters get the same treatment as in [`ExifGpsSource`].
pub fn coordinate_from_exiftool_json(json: &str) -> Option<GeoCoordinate> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let record = value.get(0)?;

    let magnitude = |key: &str, parse: fn(String) -> Option<f64>| {
        let field = record.get(key)?;
        field
            .as_f64()
            .or_else(|| parse(field.as_str()?.replace(" deg", "°")))
    };
    let letter = |key: &str| {
        record
            .get(key)?
            .as_str()?
            .chars()
            .find(|c| c.is_ascii_alphabetic())
    };

    let lat = magnitude("GPSLatitude", |s: String| latlon::parse_lat(s).ok())?;
    let lon = magnitude("GPSLongitude", |s: String| latlon::parse_lng(s).ok())?;
    let lat_ref = Hemisphere::parse(letter("GPSLatitudeRef")?, Alphabet::Exif)?;
    let lon_ref = Hemisphere::parse(letter("GPSLongitudeRef")?, Alphabet::Exif)?;
    signed_coordinate(lat, lat_ref, lon, lon_ref)
}

pub struct ExifGpsSource;

impl CoordinateSource for ExifGpsSource {
    fn name(&self) -> &'static str {
        "exif"
    }

    fn locate(&self, path: &Path) -> Option<GeoCoordinate> {
        match read_exif_gps(path) {
            Ok(coordinate) => coordinate,
            Err(e) => {
                debug!("EXIF GPS unreadable in {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn read_exif_gps(path: &Path) -> Result<Option<GeoCoordinate>, exif::Error> {
    let file = File::open(path)?;
    let mut bufreader = BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader)?;

    let field = |tag| exif.get_field(tag, exif::In::PRIMARY).map(|f| &f.value);

    let lat_ref = field(exif::Tag::GPSLatitudeRef).and_then(reference_letter);
    let lon_ref = field(exif::Tag::GPSLongitudeRef).and_then(reference_letter);
    let lat = field(exif::Tag::GPSLatitude).and_then(sexagesimal_to_f64);
    let lon = field(exif::Tag::GPSLongitude).and_then(sexagesimal_to_f64);

    let (Some(lat_ref), Some(lon_ref), Some(lat), Some(lon)) = (lat_ref, lon_ref, lat, lon)
    else {
        return Ok(None);
    };
    let lat_ref = Hemisphere::parse(lat_ref, Alphabet::Exif);
    let lon_ref = Hemisphere::parse(lon_ref, Alphabet::Exif);
    match (lat_ref, lon_ref) {
        (Some(lat_ref), Some(lon_ref)) => Ok(signed_coordinate(lat, lat_ref, lon, lon_ref)),
        _ => Ok(None),
    }
}

fn reference_letter(value: &exif::Value) -> Option<char> {
    match value {
        exif::Value::Ascii(strings) => strings
            .iter()
            .flat_map(|s| s.iter())
            .map(|byte| *byte as char)
            .find(|c| c.is_ascii_alphabetic()),
        _ => None,
    }
}

fn sexagesimal_to_f64(value: &exif::Value) -> Option<f64> {
    let parts: Vec<f64> = match value {
        exif::Value::Rational(parts) => parts.iter().map(|r| r.to_f64()).collect(),
        exif::Value::SRational(parts) => parts.iter().map(|r| r.to_f64()).collect(),
        _ => return None,
    };
    let deg = *parts.first()?;
    let min = parts.get(1).copied().unwrap_or(0.0);
    let sec = parts.get(2).copied().unwrap_or(0.0);
    let decimal = dms_to_decimal(deg, min, sec);
    decimal.is_finite().then_some(decimal)
}

pub struct FileNameSource;

fn coordinate_token() -> Option<&'static Regex> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN
        .get_or_init(|| {
            Regex::new(r"(?i)GPS(\d+(?:\.\d+)?)([SNJ])\+(\d+(?:\.\d+)?)([VEWZ])").ok()
        })
        .as_ref()
}

impl FileNameSource {
    pub fn parse_name(name: &str) -> Option<GeoCoordinate> {
        let captures = coordinate_token()?.captures(name)?;
        let lat: f64 = captures[1].parse().ok()?;
        let lon: f64 = captures[3].parse().ok()?;
        let lat_ref = Hemisphere::parse(captures[2].chars().next()?, Alphabet::FileName)?;
        let lon_ref = Hemisphere::parse(captures[4].chars().next()?, Alphabet::FileName)?;
        signed_coordinate(lat, lat_ref, lon, lon_ref)
    }
}

impl CoordinateSource for FileNameSource {
    fn name(&self) -> &'static str {
        "file name"
    }

    fn locate(&self, path: &Path) -> Option<GeoCoordinate> {
        let name = path.file_name()?.to_string_lossy();
        FileNameSource::parse_name(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attach_gps, write_jpeg};
    use tempfile::tempdir;

    fn offline_config() -> Config {
        Config {
            use_exiftool: false,
            ..Config::default()
        }
    }

    #[test]
    fn file_name_secondary_alphabet() {
        let coordinate =
            FileNameSource::parse_name("Brno GPS49.24173S+17.66780V+00042.jpg").unwrap();

        assert_eq!(coordinate.latitude(), 49.24173);
        assert_eq!(coordinate.longitude(), 17.66780);
    }

    #[test]
    fn file_name_south_and_west() {
        let coordinate = FileNameSource::parse_name("gps33.86785j+151.20732z.png").unwrap();

        assert_eq!(coordinate.latitude(), -33.86785);
        assert_eq!(coordinate.longitude(), -151.20732);
    }

    #[test]
    fn file_name_without_token() {
        assert!(FileNameSource::parse_name("holiday_0042.jpg").is_none());
        assert!(FileNameSource::parse_name("GPS49.2Q+17.6V.jpg").is_none());
    }

    #[test]
    fn exif_alphabet_keeps_compass_south() {
        assert_eq!(Hemisphere::parse('S', Alphabet::Exif), Some(Hemisphere::South));
        assert_eq!(Hemisphere::parse('s', Alphabet::FileName), Some(Hemisphere::North));
        assert_eq!(Hemisphere::parse('J', Alphabet::Exif), Some(Hemisphere::South));
        assert_eq!(Hemisphere::parse('Z', Alphabet::Exif), Some(Hemisphere::West));
        assert_eq!(Hemisphere::parse('X', Alphabet::Exif), None);
    }

    #[test]
    fn exiftool_record_uses_reference_letters() {
        let json = r#"[{"SourceFile": "a.jpg",
            "GPSLatitude": 49.5, "GPSLatitudeRef": "J",
            "GPSLongitude": 17.25, "GPSLongitudeRef": "Z"}]"#;

        let coordinate = coordinate_from_exiftool_json(json).unwrap();

        assert_eq!(coordinate.latitude(), -49.5);
        assert_eq!(coordinate.longitude(), -17.25);
    }

    #[test]
    fn exiftool_record_with_compass_letters() {
        let json = r#"[{"GPSLatitude": 12.5, "GPSLatitudeRef": "S",
            "GPSLongitude": 130.0, "GPSLongitudeRef": "E"}]"#;

        let coordinate = coordinate_from_exiftool_json(json).unwrap();

        assert_eq!(coordinate.latitude(), -12.5);
        assert_eq!(coordinate.longitude(), 130.0);
    }

    #[test]
    fn exiftool_record_without_refs_is_absent() {
        let unsigned = r#"[{"GPSLatitude": 49.5, "GPSLongitude": 17.25}]"#;

        assert!(coordinate_from_exiftool_json(unsigned).is_none());
        assert!(coordinate_from_exiftool_json(r#"[{"SourceFile": "a.jpg"}]"#).is_none());
        assert!(coordinate_from_exiftool_json("not json").is_none());
    }

    #[test]
    fn swapped_markers_are_rejected() {
        assert!(signed_coordinate(10.0, Hemisphere::East, 10.0, Hemisphere::North).is_none());
    }

    #[test]
    fn dms_conversion() {
        let decimal = dms_to_decimal(49.0, 14.0, 30.0);

        assert!((decimal - 49.241_666_666).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_coordinates() {
        assert!(GeoCoordinate::new(90.5, 0.0).is_none());
        assert!(GeoCoordinate::new(0.0, -180.5).is_none());
        assert!(GeoCoordinate::new(f64::NAN, 0.0).is_none());
        assert!(GeoCoordinate::new(-90.0, 180.0).is_some());
    }

    #[test]
    fn reads_embedded_gps() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("photo.jpg");
        write_jpeg(&path, 16, 16);
        attach_gps(&path, "S", [33, 51, 0], "W", [70, 30, 36]);

        let coordinate = ExifGpsSource.locate(&path).unwrap();

        assert!((coordinate.latitude() + 33.85).abs() < 1e-6);
        assert!((coordinate.longitude() + 70.51).abs() < 1e-6);
    }

    #[test]
    fn reads_secondary_alphabet_in_exif() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("photo.jpg");
        write_jpeg(&path, 16, 16);
        attach_gps(&path, "J", [10, 30, 0], "V", [20, 0, 0]);

        let coordinate = ExifGpsSource.locate(&path).unwrap();

        assert!((coordinate.latitude() + 10.5).abs() < 1e-6);
        assert!((coordinate.longitude() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn photo_without_gps_is_absent() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("photo.jpg");
        write_jpeg(&path, 16, 16);

        let resolver = Resolver::for_photos(&offline_config());

        assert!(resolver.resolve(&path).is_none());
        assert!(resolver.resolve(&temp_dir.path().join("missing.jpg")).is_none());
    }

    #[test]
    fn reference_maps_fall_back_to_file_name() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Olomouc GPS49.59380S+17.25087V+00007.jpg");
        write_jpeg(&path, 16, 16);

        let photos = Resolver::for_photos(&offline_config());
        let maps = Resolver::for_reference_maps(&offline_config());

        assert!(photos.resolve(&path).is_none());
        let coordinate = maps.resolve(&path).unwrap();
        assert_eq!(coordinate.latitude(), 49.59380);
        assert_eq!(coordinate.longitude(), 17.25087);
    }

    #[test]
    fn embedded_gps_wins_over_file_name() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("map GPS49.0S+17.0V+00001.jpg");
        write_jpeg(&path, 16, 16);
        attach_gps(&path, "N", [50, 0, 0], "E", [14, 0, 0]);

        let coordinate = Resolver::for_reference_maps(&offline_config())
            .resolve(&path)
            .unwrap();

        assert!((coordinate.latitude() - 50.0).abs() < 1e-9);
        assert!((coordinate.longitude() - 14.0).abs() < 1e-9);
    }
}
