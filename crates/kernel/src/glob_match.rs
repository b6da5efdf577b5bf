//! Recursive tree walks (`schema.files`, `globArtifactFiles`) and glob
//! matching. Grounded on the `ignore` crate the teacher already depends on
//! for directory traversal, plus the `glob` crate (as used by
//! `oj-shell`/`alfredjeanlab-oddjobs` for shell-style pattern matching) for
//! the `*|?|[` matching §4.6/§8 require.
//!
//! These walks are one-shot I/O performed inside an effect's task body,
//! not path-by-path reactive reads — §4.5 only mandates dependency
//! tracking for `read-file`/`read-dir`/`stat`/`exists`. An effect that
//! calls `walk_tree` still reruns whenever its other recorded dependencies
//! (e.g. the schema's `resolution` path) fire; it does not get a wake-edge
//! per descendant file.

use std::path::Path;

use ignore::WalkBuilder;

use crate::error::KernelError;
use crate::types::ChangeFile;

pub fn walk_tree(root: &Path) -> Result<Vec<ChangeFile>, KernelError> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    for entry in WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .build()
    {
        let entry = entry.map_err(|err| {
            KernelError::walk(root.to_path_buf(), std::io::Error::other(err.to_string()))
        })?;
        if entry.path() == root {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let is_directory = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        out.push(ChangeFile {
            path: relative,
            is_directory,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// True when `pattern` contains any glob metacharacter (§4.6: "when the
/// output path contains any of `* ? [`").
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Files under `root` whose path relative to `root` matches `pattern`.
pub fn matching_relative_paths(root: &Path, pattern: &str) -> Result<Vec<String>, KernelError> {
    let compiled = glob::Pattern::new(pattern).map_err(|source| KernelError::SchemaValidation {
        name: pattern.to_string(),
        reason: source.to_string(),
    })?;
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    let files = walk_tree(root)?;
    Ok(files
        .into_iter()
        .filter(|f| !f.is_directory && compiled.matches_with(&f.path, options))
        .map(|f| f.path)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn walk_tree_lists_files_and_dirs_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("specs")).unwrap();
        fs::write(dir.path().join("specs/a.md"), "a").unwrap();
        fs::write(dir.path().join("top.md"), "t").unwrap();

        let files = walk_tree(dir.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["specs", "specs/a.md", "top.md"]);
    }

    #[test]
    fn missing_root_yields_empty_list() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(walk_tree(&missing).unwrap(), Vec::new());
    }

    #[test]
    fn glob_matches_nested_files_only() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("specs/a")).unwrap();
        fs::create_dir_all(dir.path().join("specs/b")).unwrap();
        fs::write(dir.path().join("specs/a/spec.md"), "A").unwrap();
        fs::write(dir.path().join("specs/b/spec.md"), "B").unwrap();

        let matches = matching_relative_paths(dir.path(), "specs/**/spec.md").unwrap();
        assert_eq!(
            matches,
            vec![
                "specs/a/spec.md".to_string(),
                "specs/b/spec.md".to_string(),
            ]
        );
    }

    #[test]
    fn detects_glob_metacharacters() {
        assert!(is_glob_pattern("specs/**/spec.md"));
        assert!(is_glob_pattern("a?.md"));
        assert!(is_glob_pattern("[ab].md"));
        assert!(!is_glob_pattern("proposal.md"));
    }
}
