//! JSON shapes emitted by `openspec status|instructions|schemas|templates|
//! schema which` (§6). Field names follow the CLI's own JSON, not the
//! kernel's normalized `SchemaDetail` (that normalization — `generates` to
//! `outputPath`, `requires` defaulting, `apply.*` flattening — happens in
//! the `kernel` crate, not here; this crate only decodes what the CLI says).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    Project,
    User,
    Package,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaResolution {
    pub path: String,
    pub source: SchemaSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateEntry {
    pub path: String,
    pub source: SchemaSource,
}

pub type TemplatesMap = HashMap<String, TemplateEntry>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Done,
    Ready,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactStatusRaw {
    pub id: String,
    #[serde(rename = "outputPath")]
    pub output_path: String,
    pub status: ArtifactStatus,
    #[serde(rename = "missingDeps", default)]
    pub missing_deps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeStatusRaw {
    #[serde(rename = "changeName")]
    pub change_name: String,
    pub artifacts: Vec<ArtifactStatusRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactInstructions {
    pub artifact: String,
    pub instruction: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyInstructions {
    #[serde(default)]
    pub requires: Vec<String>,
    pub tracks: String,
    pub instruction: String,
}
