//! Provisioning request descriptors.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

/// Matches `{{NAME}}` placeholders, tolerating inner whitespace.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex"));

/// Names of every placeholder in `template`, deduplicated and sorted.
pub fn placeholder_names(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Substitute placeholders. Any placeholder without a value is an error.
pub fn render_template(
    source_name: &str,
    template: &str,
    values: &BTreeMap<String, String>,
) -> Result<String, ConfigError> {
    let missing: Vec<String> = placeholder_names(template)
        .into_iter()
        .filter(|name| !values.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::UnresolvedPlaceholders {
            source_name: source_name.to_string(),
            names: missing,
        });
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Immutable request submitted to the compute provider.
///
/// Wraps the provider's own request document (instance shape, image,
/// network placement and the base64 bootstrap payload are all inside it).
/// The orchestrator treats the document as opaque apart from the few
/// accessors used for narration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    document: serde_json::Value,
}

impl ProvisionRequest {
    pub fn new(document: serde_json::Value) -> Self {
        Self { document }
    }

    /// Render a template and parse the result as JSON.
    pub fn from_template(
        source_name: &str,
        template: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let rendered = render_template(source_name, template, values)?;
        let document = serde_json::from_str(&rendered).map_err(|e| {
            ConfigError::ParseError(format!("{} is not valid JSON: {}", source_name, e))
        })?;
        Ok(Self { document })
    }

    /// Load and render a template file.
    pub fn load(path: &Path, values: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MissingFile {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::ParseError(format!("failed to read {}: {}", path.display(), e))
            }
        })?;
        Self::from_template(&path.display().to_string(), &template, values)
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    fn launch_specs(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.document["LaunchSpecifications"]
            .as_array()
            .into_iter()
            .flatten()
    }

    /// Instance types across all launch specifications.
    pub fn instance_types(&self) -> Vec<&str> {
        self.launch_specs()
            .filter_map(|spec| spec["InstanceType"].as_str())
            .collect()
    }

    /// Image of the first launch specification.
    pub fn image_id(&self) -> Option<&str> {
        self.launch_specs()
            .find_map(|spec| spec["ImageId"].as_str())
    }

    pub fn target_capacity(&self) -> Option<u64> {
        self.document["TargetCapacity"].as_u64()
    }

    pub fn has_bootstrap_payload(&self) -> bool {
        self.launch_specs()
            .any(|spec| spec["UserData"].as_str().is_some_and(|s| !s.is_empty()))
    }
}

impl std::fmt::Display for ProvisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.instance_types();
        write!(
            f,
            "{} x [{}] image {}",
            self.target_capacity().unwrap_or(1),
            if types.is_empty() {
                "unspecified".to_string()
            } else {
                types.join(", ")
            },
            self.image_id().unwrap_or("unspecified")
        )
    }
}
