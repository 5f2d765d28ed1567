//! Newline-delimited list files (words, extensions, vectors, sensitive data)

use std::collections::HashSet;
use std::path::Path;

use crate::error::ListError;

/// Read a list: entries are trimmed, blank lines dropped, duplicates removed
pub fn load_list(path: &Path) -> Result<Vec<String>, ListError> {
    let mut seen = HashSet::new();
    Ok(read(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

/// Like [`load_list`], but an empty list is an error
pub fn load_required(path: &Path) -> Result<Vec<String>, ListError> {
    let entries = load_list(path)?;
    if entries.is_empty() {
        return Err(ListError::Empty(path.display().to_string()));
    }
    Ok(entries)
}

/// Raw lines, for vector files where order, headers and spacing matter
pub fn load_lines(path: &Path) -> Result<Vec<String>, ListError> {
    let lines: Vec<String> = read(path)?
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Err(ListError::Empty(path.display().to_string()));
    }
    Ok(lines)
}

/// Optional list: `None` when no path was given
pub fn load_optional(path: Option<&Path>) -> Result<Option<Vec<String>>, ListError> {
    path.map(load_list).transpose()
}

fn read(path: &Path) -> Result<String, ListError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ListError::ReadError {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "Loaded list");
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_list_cleans_entries() {
        let f = file("admin\r\n\n  backup \nadmin\n.php\n");
        assert_eq!(load_list(f.path()).unwrap(), vec!["admin", "backup", ".php"]);
    }

    #[test]
    fn test_empty_required_list() {
        let f = file("\n   \n");
        assert!(load_list(f.path()).unwrap().is_empty());
        assert!(matches!(load_required(f.path()), Err(ListError::Empty(_))));
        assert!(matches!(load_lines(f.path()), Err(ListError::Empty(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_list(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, ListError::ReadError { .. }));
        assert_eq!(load_optional(None).unwrap(), None);
    }

    #[test]
    fn test_load_lines_keeps_headers_and_order() {
        let f = file("CATEGORY: XSS\r\n<script>x</script>\n\n' OR 1=1 --\n");
        assert_eq!(
            load_lines(f.path()).unwrap(),
            vec!["CATEGORY: XSS", "<script>x</script>", "", "' OR 1=1 --"]
        );
    }
}
