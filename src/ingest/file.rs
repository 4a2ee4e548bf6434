//! Still-image file source.
//!
//! Decodes a list of local image files, in order, into `Frame`s. Intended for
//! offline runs over frames exported from a capture loop.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    pub paths: Vec<PathBuf>,
}

pub struct FileSource {
    config: FileConfig,
    next_index: usize,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if let Some(remote) = config
            .paths
            .iter()
            .find(|p| p.to_string_lossy().contains("://"))
        {
            return Err(anyhow!(
                "file source only reads local paths, got {}",
                remote.display()
            ));
        }
        Ok(Self {
            config,
            next_index: 0,
        })
    }

    /// Decode the next file, or `None` once every path has been read.
    pub fn next_frame(&mut self) -> Result<Option<(PathBuf, Frame)>> {
        let Some(path) = self.config.paths.get(self.next_index).cloned() else {
            return Ok(None);
        };
        self.next_index += 1;
        let image = image::open(&path)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        log::debug!(
            "FileSource: decoded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Some((path, Frame::from_dynamic(image))))
    }

    pub fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.next_index as u64,
            remaining: (self.config.paths.len() - self.next_index) as u64,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub remaining: u64,
}
