use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use pagepress_core::{RemoteTerm, RpcError, TermFields};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::engine::{SyncClient, count_noun};

/// taxonomy name -> full slug path -> remote term id, handed to the post
/// reconciler so term-slug references can be resolved.
pub type TermMap = HashMap<String, HashMap<String, String>>;

/// taxonomy name -> full slug path -> existing remote term. Drained as local
/// terms match; whatever remains at the end is deleted from the server.
pub type RemoteTermIndex = HashMap<String, HashMap<String, RemoteTerm>>;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z0-9]+[.\-]?)+$").expect("slug pattern is valid"));

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid taxonomy definitions file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("a {taxonomy} term has no name")]
    MissingName { taxonomy: String },
    #[error("there are multiple {taxonomy} {name} terms in one sibling group")]
    DuplicateName { taxonomy: String, name: String },
    #[error("the {taxonomy} term {name} has no slug")]
    MissingSlug { taxonomy: String, name: String },
    #[error("invalid slug: {slug}")]
    InvalidSlug { slug: String },
    #[error("invalid taxonomy: {0}")]
    UnknownTaxonomy(String),
    #[error("the {taxonomy} term {slug} references parent id {parent}, which does not exist")]
    MissingParentTerm {
        taxonomy: String,
        slug: String,
        parent: String,
    },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// One node of the local term forest as written in taxonomies.json.
/// `name` and `slug` are optional at parse time so validation can report
/// their absence individually.
#[derive(Debug, Clone, Deserialize)]
pub struct TermDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub children: Vec<TermDef>,
}

pub type TermForest = BTreeMap<String, Vec<TermDef>>;

/// Reads the taxonomy definition file. The file is optional, so a missing
/// file yields an empty forest.
pub async fn read_terms(path: &Path) -> Result<TermForest, TaxonomyError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(TermForest::new()),
        Err(source) => {
            return Err(TaxonomyError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(serde_json::from_str(&text)?)
}

/// Reconstructs a remote term's full slug path by walking its parent chain
/// through the id map; the server only stores immediate-parent ids.
fn expand_slug_path(
    taxonomy: &str,
    term: &RemoteTerm,
    by_id: &HashMap<&str, &RemoteTerm>,
) -> Result<String, TaxonomyError> {
    let mut slug = term.slug.clone();
    let mut current = term;
    // The hop budget guards against a parent cycle in the remote data.
    for _ in 0..=by_id.len() {
        if current.parent == "0" {
            return Ok(slug);
        }
        current = by_id.get(current.parent.as_str()).copied().ok_or_else(|| {
            TaxonomyError::MissingParentTerm {
                taxonomy: taxonomy.to_string(),
                slug: term.slug.clone(),
                parent: current.parent.clone(),
            }
        })?;
        slug = format!("{}/{}", current.slug, slug);
    }
    Err(TaxonomyError::MissingParentTerm {
        taxonomy: taxonomy.to_string(),
        slug: term.slug.clone(),
        parent: current.parent.clone(),
    })
}

fn validate_level(
    taxonomy: &str,
    terms: &[TermDef],
    count: &mut usize,
) -> Result<(), TaxonomyError> {
    let mut sibling_names: Vec<&str> = Vec::new();
    for term in terms {
        let name = term.name.as_deref().filter(|name| !name.is_empty()).ok_or_else(|| {
            TaxonomyError::MissingName {
                taxonomy: taxonomy.to_string(),
            }
        })?;
        if sibling_names.contains(&name) {
            return Err(TaxonomyError::DuplicateName {
                taxonomy: taxonomy.to_string(),
                name: name.to_string(),
            });
        }
        let slug = term.slug.as_deref().filter(|slug| !slug.is_empty()).ok_or_else(|| {
            TaxonomyError::MissingSlug {
                taxonomy: taxonomy.to_string(),
                name: name.to_string(),
            }
        })?;
        if !SLUG_PATTERN.is_match(slug) {
            return Err(TaxonomyError::InvalidSlug {
                slug: slug.to_string(),
            });
        }
        sibling_names.push(name);
        *count += 1;
        validate_level(taxonomy, &term.children, count)?;
    }
    Ok(())
}

impl SyncClient {
    pub(crate) async fn validate_terms(&self) -> Result<usize, TaxonomyError> {
        let definitions = read_terms(&self.taxonomies_file()).await?;
        let mut count = 0;
        for (taxonomy, terms) in &definitions {
            validate_level(taxonomy, terms, &mut count)?;
        }
        self.progress
            .log(&format!("Validated {}.", count_noun(count, "term")));
        Ok(count)
    }

    /// Builds the RemoteTermIndex: every taxonomy on the server, each with
    /// its terms keyed by reconstructed full slug path.
    pub(crate) async fn fetch_remote_terms(&self) -> Result<RemoteTermIndex, TaxonomyError> {
        self.progress.trace("Getting taxonomies from the server...");
        let taxonomies = self.rpc.get_taxonomies().await?;
        self.progress.trace("Got taxonomies from the server.");

        let mut index = RemoteTermIndex::new();
        for taxonomy in taxonomies {
            self.progress
                .trace(&format!("Getting {} terms...", taxonomy.name));
            let terms = self.rpc.get_terms(&taxonomy.name).await?;
            self.progress
                .trace(&format!("Got {} terms.", taxonomy.name));

            let by_id: HashMap<&str, &RemoteTerm> = terms
                .iter()
                .map(|term| (term.term_id.as_str(), term))
                .collect();
            let mut by_path = HashMap::new();
            for term in &terms {
                let path = expand_slug_path(&taxonomy.name, term, &by_id)?;
                by_path.insert(path, term.clone());
            }
            index.insert(taxonomy.name, by_path);
        }
        Ok(index)
    }

    /// Reconciles the local term forest against the server and returns the
    /// term map for the post reconciler. Terms are processed depth first,
    /// one at a time, because children need their parent's confirmed id.
    pub(crate) async fn sync_terms(&self) -> Result<TermMap, TaxonomyError> {
        self.progress.trace("Synchronizing terms...");
        let definitions = read_terms(&self.taxonomies_file()).await?;
        let mut remote = self.fetch_remote_terms().await?;

        let mut term_map = TermMap::new();
        self.progress.trace("Publishing terms...");
        for (taxonomy, terms) in &definitions {
            let Some(remote_terms) = remote.get_mut(taxonomy) else {
                self.progress
                    .error("Taxonomies must exist on the server prior to use in taxonomies.json.");
                return Err(TaxonomyError::UnknownTaxonomy(taxonomy.clone()));
            };

            self.progress
                .trace(&format!("Publishing {taxonomy} terms..."));
            let mut resolved = HashMap::new();
            self.publish_term_level(taxonomy, terms, None, remote_terms, &mut resolved)
                .await?;
            term_map.insert(taxonomy.clone(), resolved);
            self.progress.trace(&format!("Published {taxonomy} terms."));
        }
        self.progress.trace("Published all terms.");

        self.progress.trace("Deleting old terms...");
        for (taxonomy, terms) in remote {
            for (_, term) in terms {
                self.progress
                    .trace(&format!("Deleting {taxonomy} {}...", term.slug));
                self.rpc.delete_term(&taxonomy, &term.term_id).await?;
                self.progress
                    .log(&format!("Deleted {taxonomy} {}.", term.slug));
            }
        }
        self.progress.trace("Deleted all old terms.");

        Ok(term_map)
    }

    fn publish_term_level<'a>(
        &'a self,
        taxonomy: &'a str,
        terms: &'a [TermDef],
        parent: Option<(String, String)>,
        remote_terms: &'a mut HashMap<String, RemoteTerm>,
        resolved: &'a mut HashMap<String, String>,
    ) -> BoxFuture<'a, Result<(), TaxonomyError>> {
        Box::pin(async move {
            for term in terms {
                let name =
                    term.name
                        .as_deref()
                        .ok_or_else(|| TaxonomyError::MissingName {
                            taxonomy: taxonomy.to_string(),
                        })?;
                let slug =
                    term.slug
                        .as_deref()
                        .ok_or_else(|| TaxonomyError::MissingSlug {
                            taxonomy: taxonomy.to_string(),
                            name: name.to_string(),
                        })?;
                let path = match &parent {
                    Some((parent_path, _)) => format!("{parent_path}/{slug}"),
                    None => slug.to_string(),
                };
                let parent_id = parent.as_ref().map(|(_, id)| id.clone());

                let existing = remote_terms.remove(&path);
                let term_id = match existing {
                    Some(existing)
                        if term_matches_remote(
                            name,
                            &parent_id,
                            term.description.as_deref(),
                            &existing,
                        ) =>
                    {
                        self.progress
                            .trace(&format!("Skipping {taxonomy} {slug}; already up-to-date."));
                        existing.term_id
                    }
                    Some(existing) => {
                        let fields = TermFields {
                            taxonomy: taxonomy.to_string(),
                            name: name.to_string(),
                            slug: slug.to_string(),
                            parent: parent_id,
                            description: term.description.clone(),
                        };
                        self.progress.trace(&format!("Editing {taxonomy} {slug}..."));
                        self.rpc.edit_term(&existing.term_id, &fields).await?;
                        self.progress.log(&format!("Edited {taxonomy} {slug}."));
                        existing.term_id
                    }
                    None => {
                        let fields = TermFields {
                            taxonomy: taxonomy.to_string(),
                            name: name.to_string(),
                            slug: slug.to_string(),
                            parent: parent_id,
                            description: term.description.clone(),
                        };
                        self.progress
                            .trace(&format!("Creating {taxonomy} {slug}..."));
                        let id = self.rpc.new_term(&fields).await?;
                        self.progress.log(&format!("Created {taxonomy} {slug}."));
                        id
                    }
                };

                resolved.insert(path.clone(), term_id.clone());
                if !term.children.is_empty() {
                    self.publish_term_level(
                        taxonomy,
                        &term.children,
                        Some((path, term_id)),
                        remote_terms,
                        resolved,
                    )
                    .await?;
                }
            }
            Ok(())
        })
    }
}

/// An existing remote term needs no edit when its name, parent, and
/// description already match the local definition; slug equality is implied
/// by the path match. Absent and empty descriptions compare equal.
fn term_matches_remote(
    name: &str,
    parent_id: &Option<String>,
    description: Option<&str>,
    existing: &RemoteTerm,
) -> bool {
    let parent_matches = match parent_id {
        Some(id) => existing.parent == *id,
        None => existing.parent == "0",
    };
    let description_matches =
        existing.description.as_deref().unwrap_or("") == description.unwrap_or("");
    existing.name == name && parent_matches && description_matches
}
