//! Support code for the `repd` command line tool
//!
//! The tool keeps its server url and token in a small JSON file
//! (`$HOME/.repd` unless overridden) and reads batch payloads either as a
//! JSON array of violation requests or as one object per line.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::reputation::ViolationRequest;

/// File name of the tool configuration inside the home directory
pub const DEFAULT_CONFIG_FILENAME: &str = ".repd";

/// Connection settings for the command line tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub host_url: String,
    pub auth_token: String,
}

impl ToolConfig {
    pub fn new(host_url: &str, auth_token: &str) -> Result<Self> {
        if host_url.is_empty() {
            return Err(anyhow::anyhow!("url cannot be empty"));
        }
        if auth_token.is_empty() {
            return Err(anyhow::anyhow!("token cannot be empty"));
        }
        Ok(Self {
            host_url: host_url.to_string(),
            auth_token: auth_token.to_string(),
        })
    }

    /// `$HOME/.repd`, or `/.repd` when no home directory is known
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(DEFAULT_CONFIG_FILENAME)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file {}", path.display()))?;
        serde_json::from_str(&data).context("could not unmarshal config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self).context("could not marshal configuration file")?;
        fs::write(path, data)
            .with_context(|| format!("could not write configuration file {}", path.display()))
    }
}

/// Layout of a batch payload file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayloadFormat {
    /// JSON array of violation requests
    Json,
    /// One object per line, all with the same type and violation
    List,
}

/// Non-empty lines of a file, trimmed
pub fn read_objects(path: &Path) -> Result<Vec<String>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("could not open payload file {}", path.display()))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Violation requests from a payload file.
///
/// `object_type` and `violation` are required for [`PayloadFormat::List`]
/// and ignored for JSON payloads.
pub fn read_payload(
    path: &Path,
    format: PayloadFormat,
    object_type: Option<&str>,
    violation: Option<&str>,
) -> Result<Vec<ViolationRequest>> {
    match format {
        PayloadFormat::Json => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("could not read payload file {}", path.display()))?;
            serde_json::from_str(&data)
                .context("could not unmarshal payload file - is it valid json?")
        }
        PayloadFormat::List => {
            let (Some(object_type), Some(violation)) = (object_type, violation) else {
                return Err(anyhow::anyhow!(
                    "list payloads need both --type and --violation"
                ));
            };
            Ok(read_objects(path)?
                .into_iter()
                .map(|object| ViolationRequest {
                    violation: violation.to_string(),
                    object,
                    object_type: object_type.to_string(),
                    ..Default::default()
                })
                .collect())
        }
    }
}

/// Render rows as left-aligned columns separated by two spaces
pub fn render_table<R, C>(rows: R) -> String
where
    R: IntoIterator<Item = Vec<C>>,
    C: AsRef<str>,
{
    let rows: Vec<Vec<C>> = rows.into_iter().collect();
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.as_ref().chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for row in &rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell.as_ref(), width = *width))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILENAME);

        let config = ToolConfig::new("http://127.0.0.1:8080", "secret").unwrap();
        config.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(r#""host_url":"http://127.0.0.1:8080""#));
        assert!(raw.contains(r#""auth_token":"secret""#));
        assert_eq!(ToolConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_requires_values() {
        assert!(ToolConfig::new("", "secret").is_err());
        assert!(ToolConfig::new("http://127.0.0.1:8080", "").is_err());
        assert!(ToolConfig::load(Path::new("/nonexistent/.repd")).is_err());
    }

    #[test]
    fn test_default_path_file_name() {
        assert!(ToolConfig::default_path().ends_with(DEFAULT_CONFIG_FILENAME));
    }

    #[test]
    fn test_read_json_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"object":"10.0.0.1","type":"ip","violation":"violation1"}},
               {{"object":"a@example.com","type":"email","violation":"violation2","suppress_recovery":60}}]"#
        )
        .unwrap();

        let requests = read_payload(file.path(), PayloadFormat::Json, None, None).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].object, "10.0.0.1");
        assert_eq!(requests[1].object_type, "email");
        assert_eq!(requests[1].suppress_recovery, 60);
    }

    #[test]
    fn test_read_list_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.1\n\n 10.0.0.2 \n").unwrap();

        let requests = read_payload(
            file.path(),
            PayloadFormat::List,
            Some("ip"),
            Some("violation1"),
        )
        .unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].object, "10.0.0.2");
        assert!(
            requests
                .iter()
                .all(|r| r.object_type == "ip" && r.violation == "violation1")
        );

        assert!(read_payload(file.path(), PayloadFormat::List, Some("ip"), None).is_err());
    }

    #[test]
    fn test_invalid_json_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "10.0.0.1").unwrap();
        let err = read_payload(file.path(), PayloadFormat::Json, None, None).unwrap_err();
        assert!(err.to_string().contains("valid json"));
    }

    #[test]
    fn test_render_table() {
        let table = render_table(vec![
            vec!["TYPE", "OBJECT", "SCORE"],
            vec!["ip", "10.0.0.1", "95"],
        ]);
        assert_eq!(table, "TYPE  OBJECT    SCORE\nip    10.0.0.1  95\n");
        assert_eq!(render_table(Vec::<Vec<&str>>::new()), "");
    }
}
