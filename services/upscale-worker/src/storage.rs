//! Filesystem input resolver and result store
//!
//! Inputs are addressed by paths relative to `input_dir`. Results are streamed
//! into `<output_dir>/<job id>.mp4` through a `.part` file that is renamed on
//! success, so a partially written artifact is never visible under its final
//! name.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures_util::StreamExt;
use job_engine::{ByteStream, InputResolver, JobId, MediaInput, ResultStore, StoreError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Resolves input references to files under a base directory.
pub struct FsInputResolver {
    base: PathBuf,
}

impl FsInputResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, input_ref: &str) -> io::Result<PathBuf> {
        let relative = Path::new(input_ref);
        let confined = !input_ref.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("input reference must be a relative path inside the input directory: {input_ref}"),
            ));
        }
        Ok(self.base.join(relative))
    }
}

impl InputResolver for FsInputResolver {
    fn resolve<'a>(
        &'a self,
        input_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<MediaInput>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.path_for(input_ref)?;
            let bytes = tokio::fs::read(&path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input_ref.to_string());
            debug!(path = %path.display(), bytes = bytes.len(), "input resolved");
            Ok(MediaInput {
                file_name,
                bytes: Bytes::from(bytes),
            })
        })
    }
}

/// Writes result artifacts into an output directory.
pub struct FsResultStore {
    dir: PathBuf,
}

impl FsResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write(&self, job_id: JobId, artifact: &mut ByteStream) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.dir.join(format!("{job_id}.mp4"));
        let part_path = self.dir.join(format!("{job_id}.mp4.part"));

        let written = async {
            let mut file = tokio::fs::File::create(&part_path).await?;
            let mut total = 0usize;
            while let Some(chunk) = artifact.next().await {
                let chunk = chunk?;
                total += chunk.len();
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<usize, StoreError>(total)
        }
        .await;

        match written {
            Ok(total) => {
                tokio::fs::rename(&part_path, &final_path).await?;
                debug!(path = %final_path.display(), bytes = total, "artifact stored");
                Ok(final_path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&part_path).await {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!(path = %part_path.display(), error = %remove_err, "failed to remove partial artifact");
                    }
                }
                Err(e)
            }
        }
    }
}

impl ResultStore for FsResultStore {
    fn store(
        &self,
        job_id: JobId,
        mut artifact: ByteStream,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let path = self.write(job_id, &mut artifact).await?;
            Ok(path.display().to_string())
        })
    }
}
