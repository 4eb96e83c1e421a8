use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::OutputError;
use crate::metadata::Metadata;
use crate::utils::slugify;

const SLUG_LEN: usize = 60;
const MAX_CANDIDATES: u32 = 1000;

/// The published video and its sidecar. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub name: String,
    pub video: PathBuf,
    pub sidecar: PathBuf,
    pub hashtags: Vec<String>,
}

/// Writes finished jobs into a directory shared by every job.
pub struct Publisher {
    dir: PathBuf,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Moves `video` into the output directory under a name derived from the
    /// title. Names are claimed with exclusive creates, so concurrent jobs
    /// with the same title end up with `name`, `name-2`, `name-3` ...
    pub async fn publish(&self, video: &Path, metadata: &Metadata) -> Result<OutputArtifact, OutputError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| OutputError::Io {
                source,
                path: self.dir.clone(),
            })?;
        let stem = slugify(&metadata.title, SLUG_LEN);
        let (name, video_path, sidecar_path, sidecar) = self.reserve(&stem).await?;

        let written = async {
            place_video(video, &video_path).await?;
            write_sidecar(sidecar, &sidecar_path, &metadata.sidecar()).await
        }
        .await;
        if let Err(err) = written {
            remove_partial(&video_path).await;
            remove_partial(&sidecar_path).await;
            return Err(err);
        }

        info!("Published {} with sidecar {}", video_path.display(), sidecar_path.display());
        Ok(OutputArtifact {
            name,
            video: video_path,
            sidecar: sidecar_path,
            hashtags: metadata.hashtags.clone(),
        })
    }

    /// Claims the first free `<name>.mp4` / `<name>.txt` pair.
    async fn reserve(&self, stem: &str) -> Result<(String, PathBuf, PathBuf, File), OutputError> {
        for n in 1..=MAX_CANDIDATES {
            let name = if n == 1 {
                stem.to_string()
            } else {
                format!("{stem}-{n}")
            };
            let video = self.dir.join(format!("{name}.mp4"));
            if claim(&video).await?.is_none() {
                debug!("{} already taken", video.display());
                continue;
            }
            let sidecar = self.dir.join(format!("{name}.txt"));
            match claim(&sidecar).await {
                Ok(Some(file)) => return Ok((name, video, sidecar, file)),
                Ok(None) => {
                    debug!("{} already taken", sidecar.display());
                    remove_partial(&video).await;
                }
                Err(err) => {
                    remove_partial(&video).await;
                    return Err(err);
                }
            }
        }
        Err(OutputError::Exhausted(stem.to_string()))
    }
}

async fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial output");
        }
    }
}

/// Exclusive create; `None` when the path already exists.
async fn claim(path: &Path) -> Result<Option<File>, OutputError> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(OutputError::Io {
            source,
            path: path.to_path_buf(),
        }),
    }
}

async fn place_video(from: &Path, to: &Path) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        source,
        path: to.to_path_buf(),
    };
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Different filesystem: copy into the reserved file, then drop the source.
    fs::copy(from, to).await.map_err(io_err)?;
    if let Err(err) = fs::remove_file(from).await {
        warn!(path = %from.display(), error = %err, "failed to remove moved video");
    }
    Ok(())
}

async fn write_sidecar(mut file: File, path: &Path, contents: &str) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        source,
        path: path.to_path_buf(),
    };
    file.write_all(contents.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}
