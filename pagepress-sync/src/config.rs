use std::path::PathBuf;

use anyhow::Context;

/// Connection and content-root settings, read from the environment (with an
/// optional .env file loaded in main). CLI flags may override `dir` and
/// `verbose` after loading.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub dir: PathBuf,
    pub verbose: bool,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint =
            std::env::var("PAGEPRESS_URL").context("PAGEPRESS_URL must be set to the RPC endpoint")?;
        let username =
            std::env::var("PAGEPRESS_USERNAME").context("PAGEPRESS_USERNAME must be set")?;
        let password =
            std::env::var("PAGEPRESS_PASSWORD").context("PAGEPRESS_PASSWORD must be set")?;
        let dir = std::env::var("PAGEPRESS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Self {
            endpoint,
            username,
            password,
            dir,
            verbose: false,
        })
    }
}
