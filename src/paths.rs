//! Path handling for the command line: image discovery, natural ordering and
//! output naming.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{ConvertError, Result};

/// Extensions picked up when merging a directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Case-insensitive natural ordering: digit runs compare by numeric value.
///
/// `a2` sorts before `a10`. Runs that are numerically equal fall back to the
/// shorter run first, so `a1` sorts before `a01`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
    let b: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let ord = compare_digit_runs(&a[start_a..i], &b[start_b..j]);
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ord => return ord,
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn compare_digit_runs(a: &[char], b: &[char]) -> Ordering {
    let trim = |run: &[char]| -> usize { run.iter().take_while(|c| **c == '0').count() };
    let (sig_a, sig_b) = (&a[trim(a)..], &b[trim(b)..]);
    sig_a
        .len()
        .cmp(&sig_b.len())
        .then_with(|| sig_a.cmp(sig_b))
        .then_with(|| a.len().cmp(&b.len()))
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// All supported images under `dir`, recursively, in natural order of their
/// full path.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConvertError::InvalidPath(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy())).join("**").join("*");
    let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| ConvertError::InvalidPath(format!("{}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file() && is_supported_image(path))
        .collect();
    found.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(found)
}

/// `path` itself if free, otherwise the first free `name (n).ext`.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| parent.join(format!("{} ({}){}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Resolve where a merge writes its PDF.
///
/// A destination ending in `.pdf` is the file itself; anything else is a
/// directory that receives `<source folder name>.pdf`. Missing directories
/// are created. The result never overwrites an existing file.
pub fn resolve_merge_output(source_dir: &Path, destination: &Path) -> Result<PathBuf> {
    let target = if has_pdf_extension(destination) {
        if destination.is_dir() {
            return Err(ConvertError::InvalidPath(format!(
                "cannot create {}: a directory with that name exists",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        destination.to_path_buf()
    } else {
        if let Some(ext) = destination.extension() {
            warn!(
                extension = %ext.to_string_lossy(),
                "destination is not a .pdf file, treating it as a directory"
            );
        }
        if destination.is_file() {
            return Err(ConvertError::InvalidPath(format!(
                "{} exists and is a file; give a directory or a new .pdf name",
                destination.display()
            )));
        }
        fs::create_dir_all(destination)?;
        destination.join(format!("{}.pdf", folder_name(source_dir)))
    };
    Ok(unique_path(&target))
}

fn folder_name(dir: &Path) -> String {
    dir.canonicalize()
        .ok()
        .as_deref()
        .or(Some(dir))
        .and_then(|d| d.file_name())
        .map(|n| n.to_string_lossy().trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "output".to_string())
}

/// Check that `path` is an existing file with a `.pdf` extension.
pub fn require_pdf_file(path: &Path) -> Result<()> {
    if path.is_file() && has_pdf_extension(path) {
        Ok(())
    } else {
        Err(ConvertError::InvalidPath(format!(
            "not a PDF file: {}",
            path.display()
        )))
    }
}

/// `<dir>/<stem>_modified.pdf` next to `input`, made unique.
pub fn modified_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = input.parent().unwrap_or_else(|| Path::new(""));
    unique_path(&dir.join(format!("{}_modified.pdf", stem)))
}

/// Directory that receives extracted images; created if missing.
pub fn split_output_dir(input: &Path, destination: Option<&Path>, subfolder: bool) -> Result<PathBuf> {
    let base = match destination {
        Some(d) => d.to_path_buf(),
        None => input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let dir = match input.file_stem() {
        Some(stem) if subfolder => base.join(stem),
        _ => base,
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sorted(mut names: Vec<&str>) -> Vec<&str> {
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(sorted(vec!["c10.jpg", "b.jpg", "a.jpg", "c2.jpg"]), vec!["a.jpg", "b.jpg", "c2.jpg", "c10.jpg"]);
        assert_eq!(sorted(vec!["page10", "page9", "page100"]), vec!["page9", "page10", "page100"]);
    }

    #[test]
    fn ordering_ignores_case() {
        assert_eq!(sorted(vec!["B.png", "a.png", "C.png"]), vec!["a.png", "B.png", "C.png"]);
        assert_eq!(natural_cmp("IMG", "img"), Ordering::Equal);
    }

    #[test]
    fn leading_zeros_and_prefixes() {
        assert_eq!(natural_cmp("a01", "a1"), Ordering::Greater);
        assert_eq!(natural_cmp("a002", "a10"), Ordering::Less);
        assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
    }

    #[test]
    fn collects_recursively_and_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sub");
        fs::create_dir(&nested).unwrap();
        for name in ["b.jpg", "a.JPG", "c10.png", "c2.jpeg", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::write(nested.join("z.png"), b"x").unwrap();

        let names: Vec<String> = collect_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.jpg", "c2.jpeg", "c10.png", "sub/z.png"]);
    }

    #[test]
    fn collects_from_directories_with_pattern_characters() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scans [2024]");
        fs::create_dir_all(dir.join("b[draft]")).unwrap();
        fs::write(dir.join("a.png"), b"x").unwrap();
        fs::write(dir.join("b[draft]").join("c.jpg"), b"x").unwrap();
        fs::create_dir(dir.join("folder.png")).unwrap();

        let found = collect_images(&dir).unwrap();
        assert_eq!(found, vec![dir.join("a.png"), dir.join("b[draft]").join("c.jpg")]);
        assert!(collect_images(&root.path().join("missing")).is_err());
    }

    #[test]
    fn unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("book.pdf");
        assert_eq!(unique_path(&target), target);
        fs::write(&target, b"").unwrap();
        fs::write(dir.path().join("book (1).pdf"), b"").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("book (2).pdf"));
    }

    #[test]
    fn merge_output_into_directory_uses_source_name() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("holiday");
        fs::create_dir(&source).unwrap();
        let out_dir = root.path().join("out");

        let path = resolve_merge_output(&source, &out_dir).unwrap();
        assert_eq!(path, out_dir.join("holiday.pdf"));
        assert!(out_dir.is_dir());
    }

    #[test]
    fn merge_output_explicit_file_creates_parent() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("nested").join("Book.PDF");
        let path = resolve_merge_output(root.path(), &dest).unwrap();
        assert_eq!(path, dest);
        assert!(root.path().join("nested").is_dir());
    }

    #[test]
    fn merge_output_rejects_type_clashes() {
        let root = tempfile::tempdir().unwrap();
        let clash_dir = root.path().join("x.pdf");
        fs::create_dir(&clash_dir).unwrap();
        assert!(resolve_merge_output(root.path(), &clash_dir).is_err());

        let clash_file = root.path().join("plain");
        fs::write(&clash_file, b"").unwrap();
        assert!(resolve_merge_output(root.path(), &clash_file).is_err());
    }

    #[test]
    fn modify_and_split_paths() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("scan.pdf");
        fs::write(&input, b"%PDF").unwrap();
        require_pdf_file(&input).unwrap();
        assert!(require_pdf_file(&root.path().join("scan.txt")).is_err());

        assert_eq!(modified_output_path(&input), root.path().join("scan_modified.pdf"));

        let dir = split_output_dir(&input, None, true).unwrap();
        assert_eq!(dir, root.path().join("scan"));
        assert!(dir.is_dir());
        let elsewhere = root.path().join("imgs");
        assert_eq!(split_output_dir(&input, Some(&elsewhere), false).unwrap(), elsewhere);
    }
}
