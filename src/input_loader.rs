use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::analysis::write_json;
use crate::error::{HarvestError, Result};
use crate::models::{ProgramHarvest, Program};

/// Reads the programme catalogue written by `discover`.
pub fn load_programs<P: AsRef<Path>>(path: P) -> Result<Vec<Program>> {
    let path = path.as_ref();
    if !path.exists() {
        error!("Programs file {:?} does not exist. Run `discover` first.", path);
        return Err(HarvestError::InvalidInput(format!("missing programs file {}", path.display())));
    }
    let programs: Vec<Program> = serde_json::from_str(&fs::read_to_string(path)?)?;
    info!("Loaded {} programs from {:?}", programs.len(), path);
    Ok(programs)
}

pub fn save_programs<P: AsRef<Path>>(path: P, programs: &[Program]) -> Result<()> {
    let path = path.as_ref();
    write_json(path, programs)?;
    info!("Saved {} programs to {:?}", programs.len(), path);
    Ok(())
}

fn harvest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every per-programme output in `dir`, ordered by file name.
/// Files that do not parse are logged and skipped.
pub fn load_harvests<P: AsRef<Path>>(dir: P) -> Result<Vec<ProgramHarvest>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        error!("Projects directory {:?} not found. Run `harvest` first.", dir);
        return Err(HarvestError::InvalidInput(format!("missing projects directory {}", dir.display())));
    }

    let mut harvests = Vec::new();
    for path in harvest_files(dir)? {
        let text = fs::read_to_string(&path)?;
        match serde_json::from_str::<ProgramHarvest>(&text) {
            Ok(harvest) => harvests.push(harvest),
            Err(e) => warn!("Skipping unreadable output {:?}: {}", path, e),
        }
    }

    let projects: usize = harvests.iter().map(|h| h.children.len()).sum();
    info!("Loaded {} projects from {} program files", projects, harvests.len());
    Ok(harvests)
}
