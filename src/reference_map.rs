use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use geo::{Distance, Haversine, Point};
use tracing::{debug, info};

use crate::{
    coordinate::{GeoCoordinate, Resolver},
    Error, Result,
};

const MAP_PATTERN: &str = "*.{jpg,jpeg,png,tif,tiff,webp}";

/// Join key between a photo and its reference map, shown zero-padded to
/// five digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(u32);

impl LocationId {
    pub fn new(value: u32) -> LocationId {
        LocationId(value)
    }

    pub fn from_file_stem(stem: &str) -> Option<LocationId> {
        let (_, digits) = stem.rsplit_once('+')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(LocationId)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

impl FromStr for LocationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<LocationId> {
        let digits = s.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidLocationId(s.to_string()));
        }
        digits
            .parse()
            .map(LocationId)
            .map_err(|_| Error::InvalidLocationId(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMap {
    pub path: PathBuf,
    pub name: String,
    pub location_id: Option<LocationId>,
    pub coordinate: Option<GeoCoordinate>,
}

impl ReferenceMap {
    pub fn from_path(path: &Path, resolver: &Resolver) -> ReferenceMap {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let location_id = path
            .file_stem()
            .and_then(|stem| LocationId::from_file_stem(&stem.to_string_lossy()));
        ReferenceMap {
            path: path.to_path_buf(),
            name,
            location_id,
            coordinate: resolver.resolve(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedMap {
    pub distance_km: f64,
    pub map: ReferenceMap,
}

fn map_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let walker = globwalk::GlobWalkerBuilder::from_patterns(dir, &[MAP_PATTERN])
        .max_depth(1)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::io(dir, std::io::Error::other(e.to_string())))?;

    let mut paths: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                debug!("skipping unreadable entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

// Enumerates the reference maps in `dir`, sorted by name. Nothing is cached:
// every call reads the directory and resolves coordinates again.
pub fn scan(dir: &Path, resolver: &Resolver) -> Result<Vec<ReferenceMap>> {
    let maps: Vec<ReferenceMap> = map_files(dir)?
        .iter()
        .map(|path| ReferenceMap::from_path(path, resolver))
        .collect();
    debug!("found {} reference maps in {}", maps.len(), dir.display());
    Ok(maps)
}

pub fn distance_km(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let a = Point::new(a.longitude(), a.latitude());
    let b = Point::new(b.longitude(), b.latitude());
    Haversine::distance(a, b) / 1000.0
}

/// Nearest candidates first, at most `limit` of them. Candidates without a
/// coordinate are left out; equal distances keep their input order.
pub fn rank(
    subject: GeoCoordinate,
    candidates: impl IntoIterator<Item = ReferenceMap>,
    limit: usize,
) -> Vec<RankedMap> {
    let mut ranked: Vec<RankedMap> = candidates
        .into_iter()
        .filter_map(|map| {
            let coordinate = map.coordinate?;
            Some(RankedMap {
                distance_km: distance_km(subject, coordinate),
                map,
            })
        })
        .collect();
    ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    ranked.truncate(limit);
    ranked
}

pub fn find_by_location_id(dir: &Path, id: LocationId) -> Result<Option<PathBuf>> {
    let suffix = format!("+{}", id);
    Ok(map_files(dir)?.into_iter().find(|path| {
        path.file_stem()
            .is_some_and(|stem| stem.to_string_lossy().ends_with(&suffix))
    }))
}

pub fn rename_to_reference(photo: &Path, map: &Path, suffix: &str) -> Result<PathBuf> {
    let stem = map
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| Error::NoReferenceMap(map.display().to_string()))?;
    let file_name = match photo.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    let target = photo.with_file_name(file_name);

    if target == photo {
        return Ok(target);
    }
    if target.exists() {
        return Err(Error::TargetExists(target));
    }
    fs::rename(photo, &target).map_err(|e| Error::io(photo, e))?;
    info!("renamed {} to {}", photo.display(), target.display());
    Ok(target)
}
