use std::fs;
use std::path::{Path, PathBuf};

/// Why a candidate library path was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRejection {
    Required,
    NotFound,
    NotDirectory,
    OutsideRoots,
}

impl std::fmt::Display for PathRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            PathRejection::Required => "Path is required",
            PathRejection::NotFound => "Path does not exist",
            PathRejection::NotDirectory => "Path must be a directory",
            PathRejection::OutsideRoots => "Path is outside the allowed library roots",
        };
        f.write_str(message)
    }
}

impl std::error::Error for PathRejection {}

/// Accepts directories that resolve inside one of the allowed roots.
#[derive(Debug, Clone)]
pub struct PathValidator {
    roots: Vec<PathBuf>,
}

impl PathValidator {
    pub fn new<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut out: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = fs::canonicalize(&root).unwrap_or(root);
            if !out.contains(&root) {
                out.push(root);
            }
        }
        Self { roots: out }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn validate(&self, input: &str) -> Result<PathBuf, PathRejection> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PathRejection::Required);
        }

        let candidate = Path::new(trimmed);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(candidate))
                .unwrap_or_else(|_| candidate.to_path_buf())
        };

        let meta = match fs::metadata(&absolute) {
            Ok(meta) => meta,
            Err(_) => return Err(PathRejection::NotFound),
        };
        if !meta.is_dir() {
            return Err(PathRejection::NotDirectory);
        }

        let canonical = fs::canonicalize(&absolute).map_err(|_| PathRejection::NotFound)?;
        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(canonical)
        } else {
            Err(PathRejection::OutsideRoots)
        }
    }
}

/// Splits an operator-supplied root list. Entries are separated by `;`, and
/// on unix also by `:`.
pub fn parse_root_list(value: &str) -> Vec<PathBuf> {
    value
        .split(|ch: char| ch == ';' || (cfg!(unix) && ch == ':'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_missing_and_files() {
        let root = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(vec![root.path().to_path_buf()]);

        assert_eq!(validator.validate("   "), Err(PathRejection::Required));
        let missing = root.path().join("nope");
        assert_eq!(
            validator.validate(missing.to_str().unwrap()),
            Err(PathRejection::NotFound)
        );
        let file = root.path().join("song.mp3");
        fs::write(&file, b"x").unwrap();
        assert_eq!(
            validator.validate(file.to_str().unwrap()),
            Err(PathRejection::NotDirectory)
        );
    }

    #[test]
    fn accepts_roots_and_descendants() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("Artist").join("Album");
        fs::create_dir_all(&nested).unwrap();
        let validator = PathValidator::new(vec![root.path().to_path_buf()]);

        let canonical_root = fs::canonicalize(root.path()).unwrap();
        assert_eq!(
            validator.validate(root.path().to_str().unwrap()),
            Ok(canonical_root.clone())
        );
        assert_eq!(
            validator.validate(nested.to_str().unwrap()),
            Ok(canonical_root.join("Artist").join("Album"))
        );
    }

    #[test]
    fn rejects_directories_outside_roots() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        assert_eq!(
            validator.validate(other.path().to_str().unwrap()),
            Err(PathRejection::OutsideRoots)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_resolve_before_the_root_check() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let link = root.path().join("escape");
        std::os::unix::fs::symlink(other.path(), &link).unwrap();
        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        assert_eq!(
            validator.validate(link.to_str().unwrap()),
            Err(PathRejection::OutsideRoots)
        );
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(PathRejection::Required.to_string(), "Path is required");
        assert_eq!(
            PathRejection::OutsideRoots.to_string(),
            "Path is outside the allowed library roots"
        );
    }

    #[test]
    fn root_lists_split_on_semicolons() {
        assert_eq!(
            parse_root_list(" /a ; ;/b"),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        #[cfg(unix)]
        assert_eq!(
            parse_root_list("/a:/b;/c"),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
    }
}
