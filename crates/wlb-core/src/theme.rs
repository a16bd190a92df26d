use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::fsutil::write_atomic;

const THEME_FILE: &str = "wlb-theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    CoolArt,
    PinkPurple,
    GalleryWhite,
    DarkGallery,
}

impl Theme {
    /// Themes offered in the picker. `dark-gallery` stays readable for users
    /// who picked it earlier but is no longer offered.
    pub const SELECTABLE: [Theme; 3] = [Theme::CoolArt, Theme::PinkPurple, Theme::GalleryWhite];

    pub fn id(self) -> &'static str {
        match self {
            Theme::CoolArt => "cool-art",
            Theme::PinkPurple => "pink-purple",
            Theme::GalleryWhite => "gallery-white",
            Theme::DarkGallery => "dark-gallery",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Theme::CoolArt => "Cool Art",
            Theme::PinkPurple => "Pink-Purple Art",
            Theme::GalleryWhite => "Gallery White",
            Theme::DarkGallery => "Dark Gallery",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            Theme::CoolArt => "Cobalt + mint, glassy",
            Theme::PinkPurple => "Soft, expressive",
            Theme::GalleryWhite => "Minimal, bright",
            Theme::DarkGallery => "Moody, high contrast",
        }
    }

    /// Terminal accent used for headers.
    pub fn accent(self) -> &'static str {
        match self {
            Theme::CoolArt => "36",
            Theme::PinkPurple => "35",
            Theme::GalleryWhite => "1",
            Theme::DarkGallery => "90",
        }
    }

    /// Reads a persisted value; anything unrecognized (including legacy
    /// ids such as `cyber-cool`) falls back to the default.
    pub fn from_stored(raw: Option<&str>) -> Theme {
        match raw.map(str::parse::<Theme>) {
            Some(Ok(theme)) => theme,
            Some(Err(_)) => {
                debug!(value = ?raw, "unrecognized stored theme; using default");
                Theme::default()
            }
            None => Theme::default(),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cool-art" => Ok(Theme::CoolArt),
            "pink-purple" => Ok(Theme::PinkPurple),
            "gallery-white" => Ok(Theme::GalleryWhite),
            "dark-gallery" => Ok(Theme::DarkGallery),
            other => Err(anyhow!("unknown theme: {other}")),
        }
    }
}

/// The one persisted preference: a theme id under a fixed key.
#[derive(Debug, Clone)]
pub struct ThemePreference {
    path: PathBuf,
}

impl ThemePreference {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(THEME_FILE),
        }
    }

    pub fn load(&self) -> Theme {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Theme::from_stored(Some(raw.trim())),
            Err(err) if err.kind() == ErrorKind::NotFound => Theme::default(),
            Err(err) => {
                warn!(file = %self.path.display(), error = %err, "failed reading theme; using default");
                Theme::default()
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn save(&self, theme: Theme) -> anyhow::Result<()> {
        write_atomic(&self.path, theme.id().as_bytes())
            .with_context(|| format!("failed to save theme to {}", self.path.display()))?;
        info!(theme = %theme, "saved theme");
        Ok(())
    }
}
