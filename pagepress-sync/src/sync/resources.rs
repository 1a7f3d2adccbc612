use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pagepress_core::RpcError;
use thiserror::Error;

use super::engine::SyncClient;
use super::fingerprint::content_checksum;
use super::walker::{WalkError, ordered_files};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is outside the resources root")]
    OutsideRoot { path: PathBuf },
    #[error("{path} is not valid unicode")]
    NonUnicodePath { path: PathBuf },
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

fn resource_key(root: &Path, file: &Path) -> Result<String, ResourceError> {
    let relative = file.strip_prefix(root).map_err(|_| ResourceError::OutsideRoot {
        path: file.to_path_buf(),
    })?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| ResourceError::NonUnicodePath {
                path: file.to_path_buf(),
            })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

impl SyncClient {
    /// Reconciles flat assets by relative path and content checksum. The
    /// resources directory is optional; when it does not exist the phase
    /// succeeds without touching the server.
    pub(crate) async fn sync_resources(&self) -> Result<(), ResourceError> {
        let root = self.resources_dir();
        match tokio::fs::metadata(&root).await {
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ResourceError::Read {
                    path: root,
                    source,
                });
            }
        }

        self.progress.trace("Synchronizing resources...");
        self.progress.trace("Getting resources from the server...");
        let mut remote = self.rpc.get_resources().await?;
        self.progress.trace("Got resources from the server.");

        self.progress.trace("Publishing resources...");
        for file in ordered_files(&root).await? {
            let key = resource_key(&root, &file)?;
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|source| ResourceError::Read {
                    path: file.clone(),
                    source,
                })?;
            let encoded = STANDARD.encode(&bytes);
            let checksum = content_checksum(&encoded);

            if remote.remove(&key).is_some_and(|existing| existing == checksum) {
                self.progress
                    .trace(&format!("Skipping {key}; already up-to-date."));
                continue;
            }

            self.progress.trace(&format!("Publishing {key}..."));
            self.rpc.add_resource(&key, &encoded).await?;
            self.progress.log(&format!("Published {key}."));
        }
        self.progress.trace("Published all resources.");

        self.progress.trace("Deleting old resources...");
        for (path, _) in remote {
            self.progress.trace(&format!("Deleting {path}..."));
            self.rpc.delete_resource(&path).await?;
            self.progress.log(&format!("Deleted {path}."));
        }
        self.progress.trace("Deleted all old resources.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_is_slash_joined_and_relative() {
        let root = Path::new("/content/resources");
        let key = resource_key(root, Path::new("/content/resources/css/site.css")).unwrap();
        assert_eq!(key, "css/site.css");
    }

    #[test]
    fn resource_key_rejects_paths_outside_the_root() {
        let root = Path::new("/content/resources");
        assert!(matches!(
            resource_key(root, Path::new("/elsewhere/site.css")).unwrap_err(),
            ResourceError::OutsideRoot { .. }
        ));
    }
}
