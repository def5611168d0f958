use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

use crate::{copy_window, BodySink, ContentDescriptor, ContentSource, Liveness, Resolved, SourceError};

/// Serves files below a root directory. Keys are relative paths.
///
/// Windows are read by seeking a [`tokio::fs::File`] to the offset and
/// streaming from there.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSource { root: root.into() }
    }

    /// Maps a key onto a path below the root. Keys that are absolute or
    /// climb out of the root map to nothing.
    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let mut components = relative.components().peekable();
        components.peek()?;
        if components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            Some(self.root.join(relative))
        } else {
            None
        }
    }
}

#[async_trait]
impl ContentSource for FileSource {
    type Handle = PathBuf;

    async fn resolve(&self, key: &str) -> Result<Resolved<PathBuf>, SourceError> {
        let path = self.path_for(key).ok_or_else(|| SourceError::NotFound(key.to_string()))?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(SourceError::NotFound(key.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());
        let descriptor = ContentDescriptor::new(name, metadata.len(), metadata.modified()?);

        Ok(Resolved { descriptor, handle: path })
    }

    async fn write_window(
        &self,
        handle: &PathBuf,
        offset: u64,
        length: u64,
        buffer_size: usize,
        sink: &mut dyn BodySink,
        liveness: &mut Liveness,
    ) -> io::Result<u64> {
        let mut file = File::open(handle).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        copy_window(&mut file, length, buffer_size, sink, liveness).await
    }
}
