//! Local Knowledge Base
//!
//! The document store is a directory tree of plain-text files, one
//! sub-directory per category:
//!
//! ```text
//! data/
//! ├── Academic/          calendars, schedules, holidays
//! ├── Administrative/    policies, fees, services, contact information
//! └── Educational/       course materials and study resources
//! ```
//!
//! At query time the agent only reaches these files through [`tools::SearchTools`].
//! Admins add documents through the upload endpoint.

pub mod search;
pub mod tools;

pub use search::{extract_keywords, search_file_content};
pub use tools::SearchTools;

use crate::types::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Fixed knowledge-base partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Academic,
    Administrative,
    Educational,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Academic,
        Category::Administrative,
        Category::Educational,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Academic => "Academic",
            Category::Administrative => "Administrative",
            Category::Educational => "Educational",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "Unknown category: {}. Must be one of: Academic, Administrative, Educational",
                    s
                ))
            })
    }
}

/// Metadata about a stored document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub category: Category,
    pub size_bytes: u64,
}

/// File-system backed document store
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// All `.txt` files in a category, sorted by file name.
    ///
    /// A missing directory is an empty category, not an error.
    pub async fn list_documents(&self, category: Category) -> AppResult<Vec<PathBuf>> {
        let dir = self.category_dir(category);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_txt = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false);
            if is_txt && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub async fn describe_documents(&self, category: Category) -> AppResult<Vec<DocumentInfo>> {
        let mut infos = Vec::new();
        for path in self.list_documents(category).await? {
            let metadata = fs::metadata(&path).await?;
            infos.push(DocumentInfo {
                filename: file_label(&path),
                category,
                size_bytes: metadata.len(),
            });
        }
        Ok(infos)
    }

    /// Store an uploaded document under `category`, replacing any file with the same name
    pub async fn store_document(
        &self,
        category: Category,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<DocumentInfo> {
        let filename = sanitize_filename(filename)?;
        std::str::from_utf8(bytes)
            .map_err(|_| AppError::InvalidRequest("Document must be UTF-8 text".to_string()))?;

        let dir = self.category_dir(category);
        fs::create_dir_all(&dir).await?;

        let target = dir.join(&filename);
        let staging = dir.join(format!(".{}.{}.part", filename, uuid::Uuid::new_v4()));
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;

        info!(category = %category, filename = %filename, size = bytes.len(), "Stored document");

        Ok(DocumentInfo {
            filename,
            category,
            size_bytes: bytes.len() as u64,
        })
    }
}

/// File name used as a source label in tool output
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn sanitize_filename(raw: &str) -> AppResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name.starts_with('.') {
        return Err(AppError::InvalidRequest("Invalid file name".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
    {
        return Err(AppError::InvalidRequest(format!(
            "File name contains unsupported characters: {}",
            name
        )));
    }
    let is_txt = Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if !is_txt {
        return Err(AppError::InvalidRequest(
            "Only .txt documents are supported".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("academic".parse::<Category>().unwrap(), Category::Academic);
        assert_eq!(" EDUCATIONAL ".parse::<Category>().unwrap(), Category::Educational);
        assert!("Finance".parse::<Category>().is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("calendar.txt").unwrap(), "calendar.txt");
        assert_eq!(sanitize_filename("../../etc/fees.txt").unwrap(), "fees.txt");
        assert_eq!(sanitize_filename("C:\\docs\\Fall 2024.txt").unwrap(), "Fall 2024.txt");
        assert!(sanitize_filename("notes.pdf").is_err());
        assert!(sanitize_filename(".hidden.txt").is_err());
        assert!(sanitize_filename("a;b.txt").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[tokio::test]
    async fn test_missing_category_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = DocumentStore::new(temp_dir.path());
        assert!(store.list_documents(Category::Academic).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_and_list_documents() {
        let temp_dir = TempDir::new().unwrap();
        let store = DocumentStore::new(temp_dir.path());

        store
            .store_document(Category::Academic, "b_calendar.txt", b"Spring break: March 10")
            .await
            .unwrap();
        store
            .store_document(Category::Academic, "a_exams.txt", b"Finals: May 2")
            .await
            .unwrap();
        std::fs::write(store.category_dir(Category::Academic).join("image.png"), b"png").unwrap();

        let infos = store.describe_documents(Category::Academic).await.unwrap();
        let names: Vec<_> = infos.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a_exams.txt", "b_calendar.txt"]);
        assert_eq!(infos[0].size_bytes, "Finals: May 2".len() as u64);
    }

    #[tokio::test]
    async fn test_store_rejects_binary_content() {
        let temp_dir = TempDir::new().unwrap();
        let store = DocumentStore::new(temp_dir.path());
        let err = store
            .store_document(Category::Educational, "blob.txt", &[0xff, 0xfe, 0x00])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
