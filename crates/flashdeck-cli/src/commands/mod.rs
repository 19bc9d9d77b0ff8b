pub mod config;
pub mod progress;
pub mod run;
pub mod simulate;

use std::path::PathBuf;

use flashdeck_core::services::MediaLibrary;
use flashdeck_core::{DirectoryLibrary, Settings, StaticLibrary};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Settings from `path`, or from the default location.
pub fn load_settings(path: Option<&PathBuf>) -> Result<Settings, Box<dyn std::error::Error>> {
    let settings = match path {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    Ok(settings)
}

/// A media directory, or the built-in sample set when none is given.
pub fn media_library(dir: Option<PathBuf>) -> Box<dyn MediaLibrary> {
    match dir {
        Some(dir) => Box::new(DirectoryLibrary::new(dir)),
        None => Box::new(StaticLibrary::sample()),
    }
}
