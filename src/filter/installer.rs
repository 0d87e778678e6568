//! Program installation
//!
//! The firmware handoff is behind [`ProgramInstaller`]; the daemon writes the
//! bytecode to a file that the driver glue picks up.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Hands a program (or the zeroed data region) to the firmware
pub trait ProgramInstaller: Send + Sync {
    fn install(&self, program: &[u8]) -> Result<()>;
}

/// Writes each program atomically to `path`
#[derive(Debug, Clone)]
pub struct FileInstaller {
    path: PathBuf,
}

impl FileInstaller {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgramInstaller for FileInstaller {
    fn install(&self, program: &[u8]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)
            .map_err(|e| Error::Install(format!("{}: {}", tmp.display(), e)))?;
        file.write_all(program)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Install(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), bytes = program.len(), "Program written");
        Ok(())
    }
}
