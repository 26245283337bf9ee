use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    compositor::{BakeStyle, MAX_FEATHER_RADIUS},
    edit_session::EditorOptions,
    Error, Result,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub fill_color: [u8; 3],
    pub peak_alpha: u8,
    pub feather_radius: f32,
    pub suggestion_limit: usize,
    pub rename_suffix: String,
    pub use_exiftool: bool,
    pub bake_on_commit: bool,
    pub jpeg_quality: u8,
    pub editor: EditorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fill_color: [255, 0, 0],
            peak_alpha: 51,
            feather_radius: 14.0,
            suggestion_limit: 30,
            rename_suffix: String::from("photo"),
            use_exiftool: true,
            bake_on_commit: true,
            jpeg_quality: 95,
            editor: EditorConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// Executable of the external polygon editor
    pub program: Option<String>,
    /// Arguments placed before the style flags and the file path
    pub args: Vec<String>,
    pub point_marker_size: u32,
    pub stroke_width: u32,
    pub hide_extra_panel: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        EditorConfig {
            program: None,
            args: Vec::new(),
            point_marker_size: 6,
            stroke_width: 2,
            hide_extra_panel: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=MAX_FEATHER_RADIUS).contains(&self.feather_radius) {
            return Err(Error::Config(format!(
                "feather_radius must be within 0..={}, got {}",
                MAX_FEATHER_RADIUS, self.feather_radius
            )));
        }
        if self.suggestion_limit == 0 {
            return Err(Error::Config(String::from(
                "suggestion_limit must be at least 1",
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn bake_style(&self) -> BakeStyle {
        BakeStyle {
            fill_color: self.fill_color,
            peak_alpha: self.peak_alpha,
            feather_radius: self.feather_radius,
        }
    }

    pub fn editor_options(&self) -> EditorOptions {
        EditorOptions {
            point_marker_size: self.editor.point_marker_size,
            stroke_width: self.editor.stroke_width,
            hide_extra_panel: self.editor.hide_extra_panel,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = Config::default();

        assert_eq!(config.peak_alpha, 51);
        assert_eq!(config.feather_radius, 14.0);
        assert_eq!(config.suggestion_limit, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("aoimap.json");
        fs::write(
            &path,
            r#"{"peak_alpha": 80, "editor": {"program": "polyedit"}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.peak_alpha, 80);
        assert_eq!(config.feather_radius, 14.0);
        assert_eq!(config.editor.program.as_deref(), Some("polyedit"));
        assert_eq!(config.editor.stroke_width, 2);
    }

    #[test]
    fn rejects_negative_feather() {
        let config = Config {
            feather_radius: -1.0,
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_oversized_feather_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("aoimap.json");
        fs::write(&path, r#"{"feather_radius": 3e9}"#).unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_malformed_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("aoimap.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
