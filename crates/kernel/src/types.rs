//! Normalized NamedState value shapes (§4.6, §6). Where the CLI's raw JSON
//! differs from what the kernel hands subscribers — `status` artifacts
//! gaining a `relativePath`, schema YAML's `generates` becoming
//! `outputPath` — the normalized type lives here and the raw CLI type stays
//! in `openspec_cli::types`.

use std::collections::HashMap;

use openspec_cli::{ArtifactStatus, SchemaSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub output_path: String,
    pub relative_path: String,
    pub status: ArtifactStatus,
    pub missing_deps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeStatus {
    pub change_name: String,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactDef {
    pub id: String,
    pub output_path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDetail {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub artifacts: Vec<ArtifactDef>,
    pub apply_requires: Vec<String>,
    pub apply_tracks: Option<String>,
    pub apply_instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeFile {
    pub path: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobFileMatch {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateContent {
    pub content: String,
    pub path: String,
    pub source: SchemaSource,
}

pub type TemplateContentsMap = HashMap<String, TemplateContent>;
