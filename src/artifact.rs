//! Artifact reader: locate a completed job's file and expose it for download

use crate::error::{Error, Result};
use crate::job::JobStatus;
use crate::store::JobStore;
use std::path::Path;

/// An open artifact ready for streaming, with a size hint for Content-Length
pub struct ArtifactHandle {
    pub file: tokio::fs::File,
    pub size: u64,
    pub filename: String,
    pub mime: &'static str,
}

/// MIME type for an artifact file extension
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Resolve a key to an open artifact handle. Reports not-found for unknown
/// keys, not-ready (with the current status) before completion, and
/// artifact-missing when the recorded file has since disappeared.
pub(crate) async fn open_artifact(store: &JobStore, key: &str) -> Result<ArtifactHandle> {
    let Some(job) = store.get(key) else {
        return Err(Error::NotFound(key.to_string()));
    };
    if job.status != JobStatus::Completed {
        return Err(Error::NotReady {
            key: key.to_string(),
            status: job.status.to_string(),
        });
    }
    let Some(path) = job.file_path else {
        return Err(Error::ArtifactMissing(key.to_string()));
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ArtifactMissing(key.to_string()));
        }
        Err(e) => {
            return Err(Error::Storage(format!(
                "Failed to open artifact {}: {}",
                path, e
            )));
        }
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| Error::Storage(format!("Failed to stat artifact {}: {}", path, e)))?;

    let path_ref = Path::new(&path);
    let filename = path_ref
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string());
    let mime = path_ref
        .extension()
        .map(|e| mime_for_extension(&e.to_string_lossy()))
        .unwrap_or("application/octet-stream");

    Ok(ArtifactHandle {
        file,
        size: metadata.len(),
        filename,
        mime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_mapping() {
        assert_eq!(mime_for_extension("pdf"), "application/pdf");
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension("jpeg"), "image/jpeg");
        assert_eq!(mime_for_extension("bin"), "application/octet-stream");
    }
}
