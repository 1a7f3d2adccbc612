use std::io;
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to list {path}: {source}")]
pub struct WalkError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Enumerates every file under `root` in reconciliation order: all files in
/// a directory come before anything inside its subdirectories, and each
/// subdirectory's subtree is fully enumerated before the next sibling
/// directory starts. Callers process the result strictly in sequence, so a
/// post's structural parent is always handled before its descendants.
///
/// Sibling files are sorted by name for determinism; the order among them
/// carries no meaning. A nonexistent root is an error.
pub async fn ordered_files(root: &Path) -> Result<Vec<PathBuf>, WalkError> {
    let mut files = Vec::new();
    collect_into(root.to_path_buf(), &mut files).await?;
    Ok(files)
}

fn collect_into(dir: PathBuf, out: &mut Vec<PathBuf>) -> BoxFuture<'_, Result<(), WalkError>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|source| WalkError {
            path: dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        let mut directories = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| WalkError {
                path: dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let file_type = entry.file_type().await.map_err(|source| WalkError {
                path: entry.path(),
                source,
            })?;
            if file_type.is_dir() {
                directories.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }

        files.sort();
        directories.sort();

        out.extend(files);
        for subdirectory in directories {
            collect_into(subdirectory, out).await?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn files_come_before_subdirectory_contents() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("x.html"));
        touch(&root.join("type/a.html"));
        touch(&root.join("type/a/b.html"));

        let files = ordered_files(root).await.unwrap();
        let positions: Vec<usize> = [
            root.join("x.html"),
            root.join("type/a.html"),
            root.join("type/a/b.html"),
        ]
        .iter()
        .map(|wanted| files.iter().position(|f| f == wanted).unwrap())
        .collect();

        assert_eq!(files.len(), 3);
        // x.html is at the top level, then a.html, then only afterwards the
        // contents of type/a/.
        assert!(positions[0] < positions[1]);
        assert!(positions[1] < positions[2]);
    }

    #[tokio::test]
    async fn sibling_subtrees_stay_contiguous() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a/one.html"));
        touch(&root.join("a/deep/two.html"));
        touch(&root.join("b/three.html"));

        let files = ordered_files(root).await.unwrap();
        assert_eq!(
            files,
            vec![
                root.join("a/one.html"),
                root.join("a/deep/two.html"),
                root.join("b/three.html"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("not-there");

        let error = ordered_files(&missing).await.unwrap_err();
        assert_eq!(error.path, missing);
    }

    #[tokio::test]
    async fn empty_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(ordered_files(dir.path()).await.unwrap().is_empty());
    }
}
