//! Analysis service endpoint file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use reqwest::Url;

/// Read the single-line endpoint file and parse its base URL.
///
/// # Errors
///
/// Fails if the file cannot be read, is blank, or does not hold an
/// `http`/`https` URL.
pub fn read_endpoint(path: &Path) -> Result<Url> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read service endpoint file: {}", path.display()))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("Service endpoint file {} is empty", path.display());
    }
    let url = Url::parse(trimmed)
        .with_context(|| format!("Invalid service URL '{trimmed}' in {}", path.display()))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!(
            "Service URL '{trimmed}' in {} must use http or https",
            path.display()
        );
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_file(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline_server.txt");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_trims_surrounding_whitespace() {
        let (_dir, path) = endpoint_file("  http://mbatch.local:8080/MBatch  \n\n");
        let url = read_endpoint(&path).unwrap();
        assert_eq!(url.as_str(), "http://mbatch.local:8080/MBatch");
    }

    #[test]
    fn test_blank_file_fails() {
        let (_dir, path) = endpoint_file(" \n");
        let err = read_endpoint(&path).unwrap_err().to_string();
        assert!(err.contains("is empty"));
    }

    #[test]
    fn test_non_http_scheme_fails() {
        let (_dir, path) = endpoint_file("ftp://mbatch.local/");
        assert!(read_endpoint(&path).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        let err = read_endpoint(Path::new("/nonexistent/pipeline_server.txt"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read service endpoint file"));
    }
}
