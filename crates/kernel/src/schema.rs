//! Schema YAML: strict deserialization of the shape in spec §6, then
//! normalization to `SchemaDetail` (`generates` → `outputPath`, `requires`
//! defaulting to `[]`, `apply.*` flattening).

use serde::Deserialize;

use crate::error::KernelError;
use crate::types::{ArtifactDef, SchemaDetail};

#[derive(Debug, Deserialize)]
struct RawSchema {
    name: String,
    #[serde(default)]
    version: Option<RawVersion>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
    #[serde(default)]
    apply: Option<RawApply>,
}

/// The spec allows `version` to be either a string or a number in the
/// source YAML; normalized form is always a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVersion {
    String(String),
    Number(serde_yaml::Number),
}

impl std::fmt::Display for RawVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawVersion::String(s) => write!(f, "{s}"),
            RawVersion::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    id: String,
    generates: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawApply {
    #[serde(default)]
    requires: Vec<String>,
    tracks: String,
    instruction: String,
}

/// Parses and normalizes a `schema.yaml` document. Failure here is fatal
/// only for the owning schema's `detail` stream (§4.6 tie-breaks); callers
/// keep `files`/`yaml`/`templates` running regardless.
pub fn parse_schema_detail(yaml: &str) -> Result<SchemaDetail, KernelError> {
    let raw: RawSchema = serde_yaml::from_str(yaml).map_err(|source| KernelError::SchemaValidation {
        name: "<unknown>".to_string(),
        reason: source.to_string(),
    })?;

    if raw.artifacts.iter().any(|a| a.id.trim().is_empty()) {
        return Err(KernelError::SchemaValidation {
            name: raw.name,
            reason: "artifact id must not be empty".to_string(),
        });
    }

    let artifacts = raw
        .artifacts
        .into_iter()
        .map(|a| ArtifactDef {
            id: a.id,
            output_path: a.generates,
            description: a.description,
            template: a.template,
            instruction: a.instruction,
            requires: a.requires,
        })
        .collect();

    let (apply_requires, apply_tracks, apply_instruction) = match raw.apply {
        Some(apply) => (apply.requires, Some(apply.tracks), Some(apply.instruction)),
        None => (Vec::new(), None, None),
    };

    Ok(SchemaDetail {
        name: raw.name,
        version: raw.version.map(|v| v.to_string()),
        description: raw.description,
        artifacts,
        apply_requires,
        apply_tracks,
        apply_instruction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_schema() {
        let yaml = r#"
name: rfc
artifacts:
  - id: proposal
    generates: proposal.md
"#;
        let detail = parse_schema_detail(yaml).unwrap();
        assert_eq!(detail.name, "rfc");
        assert_eq!(detail.artifacts.len(), 1);
        assert_eq!(detail.artifacts[0].output_path, "proposal.md");
        assert_eq!(detail.artifacts[0].requires, Vec::<String>::new());
        assert!(detail.apply_tracks.is_none());
    }

    #[test]
    fn flattens_apply_block() {
        let yaml = r#"
name: rfc
version: 2
artifacts:
  - id: proposal
    generates: proposal.md
    requires: [outline]
apply:
  requires: [proposal]
  tracks: status.md
  instruction: mark the proposal applied
"#;
        let detail = parse_schema_detail(yaml).unwrap();
        assert_eq!(detail.version.as_deref(), Some("2"));
        assert_eq!(detail.apply_requires, vec!["proposal".to_string()]);
        assert_eq!(detail.apply_tracks.as_deref(), Some("status.md"));
        assert_eq!(detail.artifacts[0].requires, vec!["outline".to_string()]);
    }

    #[test]
    fn empty_artifact_id_is_a_validation_failure() {
        let yaml = r#"
name: rfc
artifacts:
  - id: ""
    generates: proposal.md
"#;
        assert!(matches!(
            parse_schema_detail(yaml),
            Err(KernelError::SchemaValidation { .. })
        ));
    }
}
