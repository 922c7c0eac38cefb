use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::ServerError;

/// Upper bound on the artifact fetch, so a dead remote store cannot hang a
/// request forever.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the classifier artifact lives, locally and remotely.
///
/// The artifact is fetched once per deployment: an existing local file
/// short-circuits the download without content validation, and is then reused
/// for the whole process lifetime.
pub struct ModelSource {
    local_path: PathBuf,
    remote_url: String,
}

impl ModelSource {
    pub fn new(local_path: PathBuf, remote_url: String) -> Self {
        Self {
            local_path,
            remote_url,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Makes sure the artifact exists at `local_path`, downloading it on a miss.
    ///
    /// After a successful return the file exists and is non-empty. The write
    /// goes through a `.part` sibling and a rename, so a request that dies
    /// mid-download never leaves a half-written artifact at the final path.
    pub async fn ensure_artifact_present(&self) -> Result<(), ServerError> {
        if self.local_path.exists() {
            debug!(path = %self.local_path.display(), "model artifact already present");
            return Ok(());
        }

        if let Some(parent) = self.local_path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(url = %self.remote_url, "downloading model artifact");
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let response = client
            .get(&self.remote_url)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ServerError::Download(format!(
                "remote returned an empty artifact: {}",
                self.remote_url
            )));
        }

        let partial = self.local_path.with_extension("part");
        fs::write(&partial, &bytes)?;
        fs::rename(&partial, &self.local_path)?;
        info!(path = %self.local_path.display(), size = bytes.len(), "model artifact ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use warp::Filter;

    use super::ModelSource;
    use crate::errors::ServerError;

    #[tokio::test]
    async fn existing_artifact_skips_download() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        fs::write(&path, b"weights").unwrap();

        // The URL is unroutable, so any network attempt would fail loudly.
        let source = ModelSource::new(path.clone(), "http://127.0.0.1:1/model".to_owned());
        source.ensure_artifact_present().await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn missing_artifact_is_downloaded() {
        let route = warp::path!("model").map(|| vec![1u8, 2, 3, 4]);
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ml_model").join("model.onnx");
        let source = ModelSource::new(path.clone(), format!("http://{}/model", addr));

        source.ensure_artifact_present().await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);

        // Second call is a no-op on the now-present file.
        source.ensure_artifact_present().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_download_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        let source = ModelSource::new(path.clone(), "http://127.0.0.1:1/model".to_owned());

        let err = source.ensure_artifact_present().await.unwrap_err();
        assert!(matches!(err, ServerError::Download(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_remote_body_is_a_download_error() {
        let route = warp::path!("model").map(Vec::<u8>::new);
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        let source = ModelSource::new(path.clone(), format!("http://{}/model", addr));

        let err = source.ensure_artifact_present().await.unwrap_err();
        assert!(matches!(err, ServerError::Download(_)));
        assert!(!path.exists());
    }
}
