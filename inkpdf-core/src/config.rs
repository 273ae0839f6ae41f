use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::canvas::{EditingContext, Tool};
use crate::export::ExportOptions;
use crate::scheduler::{PageLayout, VisibilityScheduler};
use crate::zoom::ZoomController;
use crate::Color;

pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("net", "inkpdf", "inkpdf")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub initial_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub zoom_in_step: f32,
    pub zoom_out_step: f32,
    pub render_ahead_margin: f32,
    pub page_spacing: f32,
    pub content_margin: f32,
    pub pen_color: Color,
    pub pen_width: f32,
    pub eraser_multiplier: f32,
    pub text_size: f32,
    pub label_size: f32,
    pub font_path: Option<PathBuf>,
    pub bold_font_path: Option<PathBuf>,
    pub label_exported_pages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_scale: 2.0,
            min_scale: 0.25,
            max_scale: 8.0,
            zoom_in_step: 1.25,
            zoom_out_step: 0.8,
            render_ahead_margin: 200.0,
            page_spacing: 20.0,
            content_margin: 10.0,
            pen_color: Color::BLACK,
            pen_width: 4.0,
            eraser_multiplier: 3.0,
            text_size: 18.0,
            label_size: 16.0,
            font_path: None,
            bold_font_path: None,
            label_exported_pages: true,
        }
    }
}

impl Config {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Reads a file the user named explicitly; unlike [`Config::load`] a
    /// missing file is an error.
    pub fn load_required(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("config file {:?} does not exist", path));
        }
        Self::load(path)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("initial_scale", self.initial_scale),
            ("min_scale", self.min_scale),
            ("max_scale", self.max_scale),
            ("zoom_in_step", self.zoom_in_step),
            ("zoom_out_step", self.zoom_out_step),
            ("pen_width", self.pen_width),
            ("eraser_multiplier", self.eraser_multiplier),
            ("text_size", self.text_size),
            ("label_size", self.label_size),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be a positive number, got {}", name, value));
            }
        }
        let non_negative = [
            ("render_ahead_margin", self.render_ahead_margin),
            ("page_spacing", self.page_spacing),
            ("content_margin", self.content_margin),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must not be negative, got {}", name, value));
            }
        }
        if self.min_scale > self.max_scale {
            return Err(anyhow!(
                "min_scale {} exceeds max_scale {}",
                self.min_scale,
                self.max_scale
            ));
        }
        Ok(())
    }

    pub fn zoom(&self) -> ZoomController {
        ZoomController::new(self.initial_scale, self.min_scale, self.max_scale)
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            content_margin: self.content_margin,
            page_spacing: self.page_spacing,
        }
    }

    pub fn scheduler(&self) -> VisibilityScheduler {
        VisibilityScheduler::new(self.render_ahead_margin)
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            label_size: self.label_exported_pages.then_some(self.label_size),
        }
    }

    pub fn editing_context(&self, tool: Tool, scale: f32) -> EditingContext {
        EditingContext {
            tool,
            pen_color: self.pen_color,
            pen_width: self.pen_width,
            eraser_multiplier: self.eraser_multiplier,
            text_size: self.text_size,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("typo.toml");
        let err = Config::load_required(&missing).unwrap_err();
        assert!(format!("{:#}", err).contains("typo.toml"));

        let present = dir.path().join("config.toml");
        fs::write(&present, "pen_width = 2.5\n").unwrap();
        assert_eq!(Config::load_required(&present).unwrap().pen_width, 2.5);
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "initial_scale = 1.5\npen_color = \"#ff0000\"\nlabel_exported_pages = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.initial_scale, 1.5);
        assert_eq!(config.pen_color, Color::rgb(255, 0, 0));
        assert_eq!(config.export_options().label_size, None);
        assert_eq!(config.pen_width, 4.0);
        assert_eq!(config.zoom().scale(), 1.5);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Config::from_toml("pen_color = \"red\"").is_err());
        assert!(Config::from_toml("pen_width = 0.0").is_err());
        assert!(Config::from_toml("min_scale = 4.0\nmax_scale = 2.0").is_err());
        assert!(Config::from_toml("page_spacing = -1.0").is_err());
        assert!(Config::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "initial_scale = \"big\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("config.toml"));
    }
}
