use std::path::PathBuf;

use pagepress_core::{PROTOCOL_VERSION, RpcClient, RpcError};
use thiserror::Error;

use super::posts::PostError;
use super::resources::ResourceError;
use super::taxonomies::TaxonomyError;
use crate::progress::Progress;

pub const TAXONOMIES_FILE: &str = "taxonomies.json";
pub const POSTS_DIR: &str = "posts";
pub const RESOURCES_DIR: &str = "resources";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not connect to the content server")]
    CouldNotConnect,
    #[error("server extensions for pagepress are not installed")]
    ExtensionsMissing,
    #[error("mismatched pagepress versions: client {client} but server {server}")]
    VersionMismatch { client: String, server: String },
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Post(#[from] PostError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Owns one sync run: the RPC client, the content root, and the progress
/// sinks. The reconcilers in the sibling modules hang their methods off this
/// type; nothing here is shared across runs.
pub struct SyncClient {
    pub(crate) rpc: RpcClient,
    pub(crate) dir: PathBuf,
    pub(crate) progress: Progress,
}

impl SyncClient {
    pub fn new(rpc: RpcClient, dir: PathBuf, progress: Progress) -> Self {
        Self { rpc, dir, progress }
    }

    pub(crate) fn taxonomies_file(&self) -> PathBuf {
        self.dir.join(TAXONOMIES_FILE)
    }

    pub(crate) fn posts_dir(&self) -> PathBuf {
        self.dir.join(POSTS_DIR)
    }

    pub(crate) fn resources_dir(&self) -> PathBuf {
        self.dir.join(RESOURCES_DIR)
    }

    /// Confirms the server runs matching pagepress extensions before any
    /// other traffic.
    pub async fn check_version(&self) -> Result<(), SyncError> {
        self.progress.trace("Verifying server version...");
        let server = match self.rpc.get_version().await {
            Ok(version) => version,
            Err(RpcError::Connect(_)) => return Err(SyncError::CouldNotConnect),
            Err(RpcError::UnsupportedMethod(_)) => return Err(SyncError::ExtensionsMissing),
            Err(error @ RpcError::Remote { .. }) => return Err(error.into()),
            // A failure with no remote error code gives no hint of what went
            // wrong, so point at the likely culprit before propagating.
            Err(error) => {
                self.progress.error(
                    "Unknown error. Please ensure the content server is running and functioning properly.",
                );
                return Err(error.into());
            }
        };
        if server != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                client: PROTOCOL_VERSION.to_string(),
                server,
            });
        }
        self.progress.trace("Server version matches client version.");
        Ok(())
    }

    /// Runs every structural check without performing a single remote write:
    /// version handshake, then terms, then posts.
    pub async fn validate(&self) -> Result<(), SyncError> {
        self.check_version().await?;
        self.validate_terms().await?;
        self.validate_posts().await?;
        Ok(())
    }

    /// Full reconciliation in fixed order: terms, then posts consuming the
    /// term map, then resources. The first failure aborts the rest.
    pub async fn sync(&self) -> Result<(), SyncError> {
        let outcome = self.run_sync().await;
        if let Err(error) = &outcome {
            if is_connect(error) {
                self.progress.error("Could not connect to the content server.");
            }
        }
        outcome
    }

    async fn run_sync(&self) -> Result<(), SyncError> {
        let term_map = self.sync_terms().await?;
        self.sync_posts(&term_map).await?;
        self.sync_resources().await?;
        Ok(())
    }
}

fn is_connect(error: &SyncError) -> bool {
    match error {
        SyncError::CouldNotConnect => true,
        SyncError::Rpc(RpcError::Connect(_)) => true,
        SyncError::Taxonomy(TaxonomyError::Rpc(RpcError::Connect(_))) => true,
        SyncError::Post(PostError::Rpc(RpcError::Connect(_))) => true,
        SyncError::Resource(ResourceError::Rpc(RpcError::Connect(_))) => true,
        _ => false,
    }
}

pub(crate) fn count_noun(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("one {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
