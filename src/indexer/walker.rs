use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Pdf,
    PlainText,
    Docx,
    Xlsx,
    Pptx,
}

impl SupportedFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" | "markdown" | "csv" => Some(Self::PlainText),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(path.extension()?.to_str()?)
    }
}

/// Accepts either a single supported file or a directory to walk.
/// Hidden entries are skipped; results are sorted by path.
pub fn walk_directory(root: &Path) -> Vec<(PathBuf, SupportedFormat)> {
    if root.is_file() {
        return SupportedFormat::from_path(root)
            .map(|format| vec![(root.to_path_buf(), format)])
            .unwrap_or_default();
    }

    let mut files: Vec<(PathBuf, SupportedFormat)> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let format = SupportedFormat::from_path(&path)?;
            Some((path, format))
        })
        .collect();

    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}
