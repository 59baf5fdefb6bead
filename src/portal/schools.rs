//! Schools file loading.
//!
//! One status checker link per school. Accepted layouts:
//!
//! ```text
//! # bare link, named School_<n>
//! https://aso.lsac-unite.org/?guid=xjQd2C0H4WM%3d
//!
//! # name on the line before the link
//! Harvard Law School
//! https://aso.lsac-unite.org/?guid=abc123
//!
//! # name and link separated by a pipe
//! Yale Law School | https://aso.lsac-unite.org/?guid=def456
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::models::{Application, ApplicationIdentifier};
use crate::error::ConfigError;

static GUID_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]guid=([^&\s#]+)").expect("valid regex"));

/// Load and validate the schools file.
pub fn load_schools(path: &Path) -> Result<Vec<Application>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            ConfigError::SchoolsFileNotFound(path.to_path_buf())
        } else {
            ConfigError::SchoolsFileUnreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let schools = parse_schools(&content)?;
    if schools.is_empty() {
        return Err(ConfigError::NoSchools(path.to_path_buf()));
    }

    info!("Loaded {} school(s) from {:?}", schools.len(), path);
    Ok(schools)
}

/// Parse schools file content into an ordered, duplicate-free list.
pub fn parse_schools(content: &str) -> Result<Vec<Application>, ConfigError> {
    let mut schools = Vec::new();
    let mut pending_name: Option<String> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') {
            pending_name = None;
            continue;
        }

        let (name, link) = if let Some((name, link)) = line.split_once('|') {
            pending_name = None;
            (non_empty(name), link.trim())
        } else if line.starts_with("http") {
            (pending_name.take(), line)
        } else {
            pending_name = Some(line.to_string());
            continue;
        };

        let guid = extract_guid(link).ok_or(ConfigError::MissingGuid { line: line_no })??;
        let name = name.unwrap_or_else(|| format!("School_{}", schools.len() + 1));
        schools.push(Application { name, id: guid });
    }

    validate_applications(&schools)?;
    Ok(schools)
}

/// Reject lists that name the same application twice.
pub fn validate_applications(applications: &[Application]) -> Result<(), ConfigError> {
    let mut seen: HashMap<&ApplicationIdentifier, &str> = HashMap::new();
    for app in applications {
        if let Some(first) = seen.insert(&app.id, &app.name) {
            return Err(ConfigError::DuplicateIdentifier {
                guid: app.id.to_string(),
                first: first.to_string(),
                second: app.name.clone(),
            });
        }
    }
    Ok(())
}

/// Extract and URL-decode the `guid` query parameter of a status checker link.
///
/// Returns `None` when the link has no `guid` parameter at all.
pub fn extract_guid(link: &str) -> Option<Result<ApplicationIdentifier, ConfigError>> {
    let encoded = GUID_PARAM.captures(link)?.get(1)?.as_str();

    let decoded = match urlencoding::decode(encoded) {
        Ok(decoded) => decoded,
        Err(e) => {
            return Some(Err(ConfigError::InvalidGuid {
                guid: encoded.to_string(),
                reason: e.to_string(),
            }))
        }
    };

    Some(ApplicationIdentifier::parse(&decoded))
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|s| !s.is_empty())
}
