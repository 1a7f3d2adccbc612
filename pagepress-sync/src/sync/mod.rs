pub mod engine;
pub mod fingerprint;
pub mod posts;
pub mod resources;
pub mod taxonomies;
pub mod walker;
