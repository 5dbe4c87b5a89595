//! Upload storage. A stored file is referenced as `<uuid>/<original name>`;
//! the bytes live at `{data_dir}/files/<uuid>`.
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

/// Bytes and original filename of a stored upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Saves `bytes` and returns the opaque reference.
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create file store: {}", self.root.display()))?;
        let key = uuid::Uuid::new_v4().simple().to_string();
        let path = self.root.join(&key);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write upload {}", path.display()))?;
        Ok(format!("{key}/{}", clean_filename(filename)))
    }

    pub async fn read(&self, reference: &str) -> Result<StoredFile> {
        let (key, filename) = split_reference(reference)?;
        let bytes = tokio::fs::read(self.root.join(key))
            .await
            .with_context(|| format!("missing stored file {key}"))?;
        Ok(StoredFile {
            filename: filename.to_string(),
            bytes,
        })
    }

    /// Duplicates the bytes under a new reference, as used when copying drafts.
    pub async fn copy(&self, reference: &str) -> Result<String> {
        let stored = self.read(reference).await?;
        self.save(&stored.filename, &stored.bytes).await
    }

    pub async fn delete(&self, reference: &str) -> Result<()> {
        let (key, _) = split_reference(reference)?;
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("failed to delete stored file"),
        }
    }
}

/// Original filename part of a reference, for display.
pub fn display_name(reference: &str) -> &str {
    reference.split_once('/').map(|(_, n)| n).unwrap_or(reference)
}

fn split_reference(reference: &str) -> Result<(&str, &str)> {
    let (key, filename) = reference
        .split_once('/')
        .ok_or_else(|| anyhow!("malformed file reference"))?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("malformed file reference"));
    }
    Ok((key, filename))
}

fn clean_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename).trim();
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_read_copy_delete() {
        let td = tempfile::tempdir().unwrap();
        let store = FileStore::new(td.path().join("files"));

        let reference = store.save("C:\\docs\\budget.pdf", b"pdf bytes").await.unwrap();
        assert!(reference.ends_with("/budget.pdf"));
        assert_eq!(display_name(&reference), "budget.pdf");

        let stored = store.read(&reference).await.unwrap();
        assert_eq!(stored.filename, "budget.pdf");
        assert_eq!(stored.bytes, b"pdf bytes");

        let copied = store.copy(&reference).await.unwrap();
        assert_ne!(copied, reference);
        store.delete(&reference).await.unwrap();
        assert!(store.read(&reference).await.is_err());
        assert_eq!(store.read(&copied).await.unwrap().bytes, b"pdf bytes");
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let td = tempfile::tempdir().unwrap();
        let store = FileStore::new(td.path());
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.read("nofilename").await.is_err());
    }
}
