use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

use pagepress_core::{CustomField, PostFields, PostStub, RpcError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;

use super::engine::{SyncClient, count_noun};
use super::fingerprint::{fingerprint, http_date};
use super::taxonomies::TermMap;
use super::walker::{WalkError, ordered_files};

pub const POST_EXTENSION: &str = "html";

/// Fixed key of the hidden custom field carrying a post's content
/// fingerprint, so a later run can detect no-op updates.
pub const CHECKSUM_FIELD: &str = "ppcs";

const META_OPEN: &str = "<script>";
const META_CLOSE: &str = "</script>";

const DATE_ONLY: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Error)]
pub enum PostError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid metadata block in {path}")]
    MetadataParse { path: PathBuf },
    #[error("invalid date {value:?} in {path}")]
    InvalidDate { path: PathBuf, value: String },
    #[error("invalid file extension for {path}; must be .{POST_EXTENSION}")]
    InvalidExtension { path: PathBuf },
    #[error("{path} is not under a post type directory")]
    MissingType { path: PathBuf },
    #[error("{path} does not have a parent")]
    MissingParent { path: PathBuf },
    #[error("{path} is missing required data: title")]
    MissingTitle { path: PathBuf },
    #[error("{path} is outside the posts root")]
    OutsideRoot { path: PathBuf },
    #[error("{path} is not valid unicode")]
    NonUnicodePath { path: PathBuf },
    #[error("{name} has '{taxonomy}' term slugs, but no such taxonomy exists")]
    UnknownTaxonomy { name: String, taxonomy: String },
    #[error("{name} has a {taxonomy} term slug of '{slug}', but no such term exists")]
    UnknownTermSlug {
        name: String,
        taxonomy: String,
        slug: String,
    },
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// A parsed content file. Path-derived identity lives in [`PostInfo`], not
/// here; the post record itself stays wire-shaped.
#[derive(Debug, Default)]
pub struct Post {
    pub title: Option<String>,
    pub status: Option<String>,
    pub date: Option<OffsetDateTime>,
    pub modified: Option<OffsetDateTime>,
    pub term_slugs: HashMap<String, Vec<String>>,
    pub custom_fields: Vec<CustomField>,
    pub extra: serde_json::Map<String, Value>,
    pub content: String,
}

/// Identity derived from a post file's location under the posts root: the
/// slash-joined extension-less path, its first segment (type), its last
/// segment (name), and the immediate parent post's path (None at depth 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInfo {
    pub path: String,
    pub post_type: String,
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    term_slugs: HashMap<String, Vec<String>>,
    #[serde(default)]
    custom_fields: Vec<CustomField>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// Converts a post path to a more readable name, e.g. "page/foo/bar" to
/// "page foo/bar".
pub fn pretty_name(post_path: &str) -> String {
    post_path.replacen('/', " ", 1)
}

/// Parses a content file. The metadata block is optional; when present it
/// must start at the first byte and hold valid JSON.
pub async fn parse_post(path: &Path) -> Result<Post, PostError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PostError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let (block, content) = split_metadata(&text, path)?;
    let mut post = Post::default();
    if let Some(block) = block {
        let raw: RawMeta =
            serde_json::from_str(block).map_err(|_| PostError::MetadataParse {
                path: path.to_path_buf(),
            })?;
        post.title = raw.title;
        post.status = raw.status;
        post.date = raw
            .date
            .as_deref()
            .map(|value| parse_post_date(value, path))
            .transpose()?;
        post.modified = raw
            .modified
            .as_deref()
            .map(|value| parse_post_date(value, path))
            .transpose()?;
        post.term_slugs = raw.term_slugs;
        post.custom_fields = raw.custom_fields;
        post.extra = raw.extra;
    }
    post.content = content.to_string();
    Ok(post)
}

fn split_metadata<'a>(
    text: &'a str,
    path: &Path,
) -> Result<(Option<&'a str>, &'a str), PostError> {
    let Some(rest) = text.strip_prefix(META_OPEN) else {
        return Ok((None, text));
    };
    let Some(end) = rest.find(META_CLOSE) else {
        return Err(PostError::MetadataParse {
            path: path.to_path_buf(),
        });
    };
    Ok((Some(&rest[..end]), &rest[end + META_CLOSE.len()..]))
}

fn parse_post_date(value: &str, path: &Path) -> Result<OffsetDateTime, PostError> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed);
    }
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc2822) {
        return Ok(parsed);
    }
    if let Ok(parsed) = time::Date::parse(value, DATE_ONLY) {
        return Ok(parsed.midnight().assume_utc());
    }
    Err(PostError::InvalidDate {
        path: path.to_path_buf(),
        value: value.to_string(),
    })
}

/// Derives a [`PostInfo`] from a file's location under the posts root.
pub fn post_info_for(root: &Path, file: &Path) -> Result<PostInfo, PostError> {
    let relative = file
        .strip_prefix(root)
        .map_err(|_| PostError::OutsideRoot {
            path: file.to_path_buf(),
        })?
        .with_extension("");

    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(PostError::OutsideRoot {
                path: file.to_path_buf(),
            });
        };
        let part = part.to_str().ok_or_else(|| PostError::NonUnicodePath {
            path: file.to_path_buf(),
        })?;
        parts.push(part.to_string());
    }

    let path = parts.join("/");
    let Some(name) = parts.pop() else {
        return Err(PostError::MissingType {
            path: file.to_path_buf(),
        });
    };
    let parent = if parts.len() > 1 {
        Some(parts.join("/"))
    } else {
        None
    };
    let Some(post_type) = parts.into_iter().next() else {
        return Err(PostError::MissingType {
            path: file.to_path_buf(),
        });
    };

    Ok(PostInfo {
        path,
        post_type,
        name,
        parent,
    })
}

/// Merges the desired custom-field set against the fields currently on the
/// server: exact key+value matches adopt the existing id and become in-place
/// updates; every unmatched existing field turns into an id-only deletion
/// marker appended to the request.
fn merge_custom_fields(
    mut desired: Vec<CustomField>,
    mut existing: Vec<CustomField>,
) -> Vec<CustomField> {
    for field in &mut desired {
        if let Some(index) = existing
            .iter()
            .position(|candidate| candidate.key == field.key && candidate.value == field.value)
        {
            field.id = existing.remove(index).id;
        }
    }
    desired.extend(
        existing
            .into_iter()
            .map(|leftover| CustomField::deletion(leftover.id)),
    );
    desired
}

fn custom_fields_value(fields: &[CustomField]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|field| {
                let mut entry = serde_json::Map::new();
                if let Some(key) = &field.key {
                    entry.insert("key".to_string(), Value::String(key.clone()));
                }
                if let Some(value) = &field.value {
                    entry.insert("value".to_string(), Value::String(value.clone()));
                }
                Value::Object(entry)
            })
            .collect(),
    )
}

fn string_lists_value(lists: &HashMap<String, Vec<String>>) -> Value {
    let mut object = serde_json::Map::new();
    for (key, values) in lists {
        object.insert(
            key.clone(),
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        );
    }
    Value::Object(object)
}

/// Canonical record a post's fingerprint is computed over. Assembled before
/// any existing remote id is attached, so create and edit paths fingerprint
/// identically for the same logical content.
fn fingerprint_record(
    info: &PostInfo,
    post: &Post,
    title: &str,
    status: &str,
    parent_id: Option<&str>,
    terms: &HashMap<String, Vec<String>>,
) -> Value {
    let mut record = post.extra.clone();
    record.insert("type".into(), Value::String(info.post_type.clone()));
    record.insert("name".into(), Value::String(info.name.clone()));
    record.insert("title".into(), Value::String(title.to_string()));
    record.insert("status".into(), Value::String(status.to_string()));
    record.insert("content".into(), Value::String(post.content.clone()));
    if let Some(parent_id) = parent_id {
        record.insert("parent".into(), Value::String(parent_id.to_string()));
    }
    if !post.term_slugs.is_empty() {
        record.insert("termSlugs".into(), string_lists_value(&post.term_slugs));
        record.insert("terms".into(), string_lists_value(terms));
    }
    if let Some(date) = post.date {
        record.insert("date".into(), Value::String(http_date(date)));
    }
    if let Some(modified) = post.modified {
        record.insert("modified".into(), Value::String(http_date(modified)));
    }
    if !post.custom_fields.is_empty() {
        record.insert(
            "customFields".into(),
            custom_fields_value(&post.custom_fields),
        );
    }
    Value::Object(record)
}

impl SyncClient {
    /// Walks every post, checking structure without any remote writes:
    /// canonical extension, parent seen earlier in the walk, required title.
    /// Returns the number of posts validated.
    pub(crate) async fn validate_posts(&self) -> Result<usize, PostError> {
        let root = self.posts_dir();
        let mut seen = HashSet::new();
        let mut count = 0;

        for file in ordered_files(&root).await? {
            let info = post_info_for(&root, &file)?;
            // A parse failure aborts the walk here, so later stages know the
            // metadata of every post is already structurally valid.
            let post = parse_post(&file).await?;
            seen.insert(info.path.clone());

            if file.extension().and_then(OsStr::to_str) != Some(POST_EXTENSION) {
                return Err(PostError::InvalidExtension { path: file });
            }
            if let Some(parent) = &info.parent {
                if !seen.contains(parent) {
                    return Err(PostError::MissingParent { path: file });
                }
            }
            if post.title.as_deref().unwrap_or("").is_empty() {
                return Err(PostError::MissingTitle { path: file });
            }
            count += 1;
        }

        self.progress
            .log(&format!("Validated {}.", count_noun(count, "post")));
        Ok(count)
    }

    /// Reconciles local posts against the server. Parents resolve to ids
    /// assigned during this run, which the walk order guarantees exist by
    /// the time a descendant needs them.
    pub(crate) async fn sync_posts(&self, term_map: &TermMap) -> Result<(), PostError> {
        let root = self.posts_dir();
        self.progress.trace("Getting post paths from the server...");
        let mut remote = self.rpc.get_post_paths().await?;
        self.progress.trace("Got post paths from the server.");

        self.progress.trace("Publishing posts...");
        let mut resolved: HashMap<String, String> = HashMap::new();
        for file in ordered_files(&root).await? {
            let info = post_info_for(&root, &file)?;
            let post = parse_post(&file).await?;
            self.publish_post(&file, &info, post, term_map, &mut remote, &mut resolved)
                .await?;
        }
        self.progress.trace("Published all posts.");

        self.progress.trace("Deleting old posts...");
        for (path, stub) in remote {
            self.delete_remote_post(&stub.id, &path).await?;
        }
        self.progress.trace("Deleted all old posts.");
        Ok(())
    }

    async fn publish_post(
        &self,
        file: &Path,
        info: &PostInfo,
        post: Post,
        term_map: &TermMap,
        remote: &mut HashMap<String, PostStub>,
        resolved: &mut HashMap<String, String>,
    ) -> Result<(), PostError> {
        let name = pretty_name(&info.path);

        let title = post
            .title
            .clone()
            .filter(|title| !title.is_empty())
            .ok_or_else(|| PostError::MissingTitle {
                path: file.to_path_buf(),
            })?;
        let status = post
            .status
            .clone()
            .unwrap_or_else(|| "publish".to_string());

        // Parents always resolve to the id assigned during this run, never a
        // stale pre-existing one.
        let parent_id = match &info.parent {
            Some(parent_path) => Some(resolved.get(parent_path).cloned().ok_or_else(|| {
                PostError::MissingParent {
                    path: file.to_path_buf(),
                }
            })?),
            None => None,
        };

        let terms = self.resolve_term_slugs(&name, &post, term_map)?;
        let checksum = fingerprint(&fingerprint_record(
            info,
            &post,
            &title,
            &status,
            parent_id.as_deref(),
            &terms,
        ));

        let existing = remote.remove(&info.path);
        if let Some(stub) = &existing {
            if stub.checksum.as_deref() == Some(checksum.as_str()) {
                self.progress
                    .trace(&format!("Skipping {name}; already up-to-date."));
                resolved.insert(info.path.clone(), stub.id.clone());
                return Ok(());
            }
        }

        let mut custom_fields = post.custom_fields.clone();
        custom_fields.push(CustomField::pair(CHECKSUM_FIELD, &checksum));

        let mut fields = PostFields {
            post_type: info.post_type.clone(),
            name: info.name.clone(),
            title,
            status,
            parent: parent_id,
            date: post.date.map(http_date),
            modified: post.modified.map(http_date),
            terms,
            custom_fields,
            content: post.content,
            extra: post.extra,
        };

        let post_id = match existing {
            Some(stub) => {
                self.progress
                    .trace(&format!("Getting custom fields for {name}..."));
                let remote_post = self.rpc.get_post(&stub.id, &["customFields"]).await?;
                self.progress
                    .trace(&format!("Got custom fields for {name}."));
                if !remote_post.custom_fields.is_empty() {
                    fields.custom_fields =
                        merge_custom_fields(fields.custom_fields, remote_post.custom_fields);
                }

                self.progress.trace(&format!("Editing {name}..."));
                self.rpc.edit_post(&stub.id, &fields).await?;
                self.progress.log(&format!("Edited {name}."));
                stub.id
            }
            None => {
                self.progress.trace(&format!("Creating {name}..."));
                let id = self.rpc.new_post(&fields).await?;
                self.progress.log(&format!("Created {name}."));
                id
            }
        };

        resolved.insert(info.path.clone(), post_id);
        Ok(())
    }

    fn resolve_term_slugs(
        &self,
        name: &str,
        post: &Post,
        term_map: &TermMap,
    ) -> Result<HashMap<String, Vec<String>>, PostError> {
        let mut terms = HashMap::new();
        let mut taxonomies: Vec<&String> = post.term_slugs.keys().collect();
        taxonomies.sort();
        for taxonomy in taxonomies {
            let slug_map =
                term_map
                    .get(taxonomy)
                    .ok_or_else(|| PostError::UnknownTaxonomy {
                        name: name.to_string(),
                        taxonomy: taxonomy.clone(),
                    })?;
            let mut ids = Vec::new();
            for slug in &post.term_slugs[taxonomy] {
                let id = slug_map
                    .get(slug)
                    .cloned()
                    .ok_or_else(|| PostError::UnknownTermSlug {
                        name: name.to_string(),
                        taxonomy: taxonomy.clone(),
                        slug: slug.clone(),
                    })?;
                ids.push(id);
            }
            terms.insert(taxonomy.clone(), ids);
        }
        Ok(terms)
    }

    /// Removes a remote post with no local counterpart. The first delete
    /// moves the post to trash, the second purges it; both must succeed.
    async fn delete_remote_post(&self, post_id: &str, post_path: &str) -> Result<(), PostError> {
        let name = pretty_name(post_path);

        self.progress.trace(&format!("Trashing {name}..."));
        self.rpc.delete_post(post_id).await?;
        self.progress.trace(&format!("Trashed {name}."));

        self.progress.trace(&format!("Deleting {name}..."));
        self.rpc.delete_post(post_id).await?;
        self.progress.log(&format!("Deleted {name}."));
        Ok(())
    }
}
