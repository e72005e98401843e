use crate::directives::IncludeRoots;
use crate::extractor::contains_eligible_fragment;
use crate::rendering::{DocumentKind, DocumentTask};
use anyhow::{Context, Result};
use mdbook::book::{Book, BookItem};
use std::path::{Path, PathBuf};

/// Maximum size of a single document in bytes (10MB)
pub const MAX_DOCUMENT_SIZE: usize = 10_000_000;

/// Collects a task for every chapter that may contain an upgradable block.
///
/// Draft chapters (no path) are skipped. Chapters whose pre-scan finds no
/// eligible fence are left out, so they are never re-scanned line by line.
///
/// # Errors
///
/// Returns an error if a chapter exceeds [`MAX_DOCUMENT_SIZE`].
pub fn collect_chapter_tasks(book: &Book, languages: &[String]) -> Result<Vec<DocumentTask>> {
    let mut tasks = Vec::new();
    let mut collection_errors = Vec::new();

    for item in book.iter() {
        let BookItem::Chapter(chapter) = item else {
            continue;
        };
        let Some(chapter_path) = &chapter.path else {
            continue;
        };

        if chapter.content.len() > MAX_DOCUMENT_SIZE {
            collection_errors.push(format!(
                "Chapter {} is {} bytes, exceeding limit of {}",
                chapter_path.display(),
                chapter.content.len(),
                MAX_DOCUMENT_SIZE
            ));
            continue;
        }

        if !contains_eligible_fragment(&chapter.content, languages) {
            log::trace!("No candidate blocks in chapter: {}", chapter.name);
            continue;
        }

        log::debug!("Collecting chapter: {}", chapter.name);
        tasks.push(DocumentTask::new(
            DocumentKind::Markdown,
            chapter_path.clone(),
            chapter.content.clone(),
        ));
    }

    if !collection_errors.is_empty() {
        for error in &collection_errors {
            log::error!("{}", error);
        }
        anyhow::bail!(
            "Failed to collect chapters due to {} error(s)",
            collection_errors.len()
        );
    }

    Ok(tasks)
}

/// Collects tasks for standalone files, choosing the host by extension.
///
/// `.md` files use the markdown host; `.rst` files use the directive host
/// with `literalinclude` paths resolved against the file's directory and
/// `source_root`.
pub fn collect_file_tasks(files: &[PathBuf], source_root: &Path) -> Result<Vec<DocumentTask>> {
    let mut tasks = Vec::with_capacity(files.len());

    for path in files {
        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("markdown") => DocumentKind::Markdown,
            Some("rst") => {
                let doc_dir = path.parent().unwrap_or_else(|| Path::new("."));
                DocumentKind::Rst(IncludeRoots::new(doc_dir, source_root))
            }
            _ => anyhow::bail!(
                "Unsupported file type: {} (expected .md or .rst)",
                path.display()
            ),
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if content.len() > MAX_DOCUMENT_SIZE {
            anyhow::bail!(
                "{} is {} bytes, exceeding limit of {}",
                path.display(),
                content.len(),
                MAX_DOCUMENT_SIZE
            );
        }

        tasks.push(DocumentTask::new(kind, path.clone(), content));
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdbook::book::{Chapter, SectionNumber};
    use tempfile::TempDir;

    fn langs() -> Vec<String> {
        vec!["python".to_string()]
    }

    fn chapter(name: &str, content: &str, path: Option<&str>) -> Chapter {
        let mut ch = Chapter::new(name, content.to_string(), path.unwrap_or(""), Vec::new());
        ch.path = path.map(PathBuf::from);
        ch.number = Some(SectionNumber(vec![1]));
        ch
    }

    #[test]
    fn test_collects_only_candidate_chapters() {
        let mut book = Book::new();
        book.push_item(chapter("Code", "```python\nx = 1\n```\n", Some("code.md")));
        book.push_item(chapter("Prose", "Just words.\n", Some("prose.md")));
        book.push_item(chapter("Draft", "```python\nx = 1\n```\n", None));

        let mut nested = chapter("Parent", "Intro\n", Some("parent/index.md"));
        nested.sub_items.push(BookItem::Chapter(chapter(
            "Child",
            "```python\ny = 2\n```\n",
            Some("parent/child.md"),
        )));
        book.push_item(nested);

        let tasks = collect_chapter_tasks(&book, &langs()).unwrap();
        let paths: Vec<&Path> = tasks.iter().map(|t| t.path()).collect();
        assert_eq!(paths, vec![Path::new("code.md"), Path::new("parent/child.md")]);
    }

    #[test]
    fn test_file_tasks_by_extension() {
        let tmp = TempDir::new().unwrap();
        let md = tmp.path().join("a.md");
        let rst = tmp.path().join("b.rst");
        std::fs::write(&md, "# A\n").unwrap();
        std::fs::write(&rst, "B\n=\n").unwrap();

        let tasks = collect_file_tasks(&[md.clone(), rst.clone()], tmp.path()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].path(), md.as_path());
        assert_eq!(tasks[1].path(), rst.as_path());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let tmp = TempDir::new().unwrap();
        let txt = tmp.path().join("notes.txt");
        std::fs::write(&txt, "x").unwrap();
        assert!(collect_file_tasks(&[txt], tmp.path()).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.md");
        let err = collect_file_tasks(&[missing], tmp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read"));
    }
}
