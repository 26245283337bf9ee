use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub use config::Config;
pub use coordinate::{GeoCoordinate, Resolver};
pub use edit_session::{EditOutcome, EditorOptions, PolygonEditor};
pub use error::{Error, Result};
pub use polygon_metadata::{Polygon, Stored};
pub use reference_map::{LocationId, RankedMap, ReferenceMap};

pub mod compositor;
pub mod config;
pub mod container;
pub mod coordinate;
pub mod edit_session;
mod error;
pub mod polygon_metadata;
pub mod reference_map;

#[cfg(test)]
mod test_support;

#[derive(Default)]
pub struct Sinks {
    pub location_id: Option<Box<dyn FnMut(Option<LocationId>)>>,
    pub coordinate: Option<Box<dyn FnMut(Option<GeoCoordinate>)>>,
    pub suggestions: Option<Box<dyn FnMut(&[RankedMap])>>,
    pub status: Option<Box<dyn FnMut(&str)>>,
}

impl Sinks {
    fn location_id(&mut self, id: Option<LocationId>) {
        if let Some(sink) = self.location_id.as_mut() {
            sink(id);
        }
    }

    fn coordinate(&mut self, coordinate: Option<GeoCoordinate>) {
        if let Some(sink) = self.coordinate.as_mut() {
            sink(coordinate);
        }
    }

    fn suggestions(&mut self, ranked: &[RankedMap]) {
        if let Some(sink) = self.suggestions.as_mut() {
            sink(ranked);
        }
    }

    fn status(&mut self, msg: &str) {
        if let Some(sink) = self.status.as_mut() {
            sink(msg);
        }
    }
}

/// What a commit did. The polygon step is the only fatal one; bake and
/// rename failures are reported here after the geometry is already saved.
#[derive(Debug)]
pub struct CommitReport {
    pub stored: Stored,
    /// `None` when baking is disabled or there is no polygon to bake.
    pub baked: Option<Result<()>>,
    /// `None` when no location ID or maps directory was given.
    pub renamed: Option<Result<PathBuf>>,
}

impl CommitReport {
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(Err(e)) = &self.baked {
            warnings.push(format!("fill not baked: {}", e));
        }
        if let Some(Err(e)) = &self.renamed {
            warnings.push(format!("not renamed: {}", e));
        }
        warnings
    }
}

pub struct Session {
    photo: PathBuf,
    config: Config,
    coordinate: Option<GeoCoordinate>,
    polygon: Option<Polygon>,
    suggestions: Vec<RankedMap>,
    location_id: Option<LocationId>,
    sinks: Sinks,
}

impl Session {
    pub fn open(photo: &Path, config: Config, sinks: Sinks) -> Result<Session> {
        config.validate()?;
        if !photo.is_file() {
            return Err(Error::io(
                photo,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such photo"),
            ));
        }
        let coordinate = Resolver::for_photos(&config).resolve(photo);
        let polygon = match polygon_metadata::read(photo) {
            Ok(polygon) => polygon,
            Err(e) => {
                warn!("cannot read polygon of {}: {}", photo.display(), e);
                None
            }
        };

        let mut session = Session {
            photo: photo.to_path_buf(),
            config,
            coordinate,
            polygon,
            suggestions: Vec::new(),
            location_id: None,
            sinks,
        };
        session.sinks.coordinate(coordinate);
        if coordinate.is_none() {
            session.status(&format!("no GPS position in {}", photo.display()));
        }
        Ok(session)
    }

    pub fn photo(&self) -> &Path {
        &self.photo
    }

    pub fn coordinate(&self) -> Option<GeoCoordinate> {
        self.coordinate
    }

    pub fn polygon(&self) -> Option<&Polygon> {
        self.polygon.as_ref()
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn suggest(&mut self, maps_dir: &Path) -> Result<&[RankedMap]> {
        let Some(subject) = self.coordinate else {
            self.suggestions.clear();
            self.sinks.suggestions(&self.suggestions);
            return Ok(&self.suggestions);
        };
        let resolver = Resolver::for_reference_maps(&self.config);
        let candidates = reference_map::scan(maps_dir, &resolver)?;
        self.suggestions = reference_map::rank(subject, candidates, self.config.suggestion_limit);
        self.sinks.suggestions(&self.suggestions);

        if self.suggestions.is_empty() {
            self.status("no reference map with a known position");
        } else {
            self.select_suggestion(0);
        }
        Ok(&self.suggestions)
    }

    /// Fills the location ID from the suggestion at `index`. Maps without an
    /// ID in their name leave the current value alone.
    pub fn select_suggestion(&mut self, index: usize) -> Option<LocationId> {
        let id = self.suggestions.get(index)?.map.location_id?;
        self.set_location_id(Some(id));
        Some(id)
    }

    /// Takes the location ID as typed by the user. Blank clears it; anything
    /// but digits is rejected and the current value kept.
    pub fn set_location_id_text(&mut self, text: &str) -> Result<Option<LocationId>> {
        let id = if text.trim().is_empty() {
            None
        } else {
            Some(text.parse::<LocationId>()?)
        };
        self.set_location_id(id);
        Ok(id)
    }

    fn set_location_id(&mut self, id: Option<LocationId>) {
        self.location_id = id;
        self.sinks.location_id(id);
    }

    pub fn set_polygon(&mut self, points: Vec<[f64; 2]>) -> Result<()> {
        self.polygon = match Polygon::try_from(points) {
            Ok(polygon) => Some(polygon),
            Err(Error::DegeneratePolygon(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(())
    }

    /// Hands the polygon to `editor`. Only an accepted edit changes it, and
    /// only in memory until [`Session::commit`].
    pub fn edit_polygon(&mut self, editor: &mut dyn PolygonEditor) -> Result<EditOutcome> {
        let options = self.config.editor_options();
        let outcome =
            edit_session::open_for_edit(&self.photo, self.polygon.as_ref(), editor, &options)?;
        if let EditOutcome::Accepted(points) = &outcome {
            self.set_polygon(points.clone())?;
        }
        Ok(outcome)
    }

    pub fn commit(&mut self, maps_dir: Option<&Path>) -> Result<CommitReport> {
        let points = self
            .polygon
            .as_ref()
            .map(|p| p.points().to_vec())
            .unwrap_or_default();
        let stored = polygon_metadata::store(&self.photo, &points)?;
        match &stored {
            Stored::Written(_) => self.status("polygon saved"),
            Stored::Removed => self.status("polygon removed"),
        }

        let baked = match (&stored, self.config.bake_on_commit) {
            (Stored::Written(polygon), true) => {
                let result = compositor::bake(
                    &self.photo,
                    polygon,
                    &self.config.bake_style(),
                    self.config.jpeg_quality,
                );
                if let Err(e) = &result {
                    warn!("bake of {} failed: {}", self.photo.display(), e);
                    self.status(&format!("fill not baked: {}", e));
                }
                Some(result)
            }
            _ => None,
        };

        let renamed = match (self.location_id, maps_dir) {
            (Some(id), Some(dir)) => {
                let result = self.rename_to_map(dir, id);
                if let Err(e) = &result {
                    warn!("rename of {} skipped: {}", self.photo.display(), e);
                    self.status(&format!("not renamed: {}", e));
                }
                Some(result)
            }
            _ => None,
        };

        Ok(CommitReport {
            stored,
            baked,
            renamed,
        })
    }

    fn rename_to_map(&mut self, maps_dir: &Path, id: LocationId) -> Result<PathBuf> {
        let map = reference_map::find_by_location_id(maps_dir, id)?
            .ok_or_else(|| Error::NoReferenceMap(id.to_string()))?;
        let target =
            reference_map::rename_to_reference(&self.photo, &map, &self.config.rename_suffix)?;
        self.photo = target.clone();
        Ok(target)
    }

    fn status(&mut self, msg: &str) {
        info!("{}", msg);
        self.sinks.status(msg);
    }
}
