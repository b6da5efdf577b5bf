//! NamedState key shapes (§3, §4.6): `global:<name>`,
//! `schema:<name>:<aspect>`, `change:<id>:<aspect>[:schema]`. Kept as plain
//! `String`s rather than an enum because entity teardown (§9) needs to
//! delete "every state key with the entity prefix," which is naturally a
//! string-prefix scan.

pub fn global(name: &str) -> String {
    format!("global:{name}")
}

pub fn schema(name: &str, aspect: &str) -> String {
    format!("schema:{name}:{aspect}")
}

/// Per-change keys optionally carry a schema qualifier. `schema=None` is
/// the unqualified form the spec says coexists alongside qualified ones
/// (§4.6 tie-breaks).
pub fn change(id: &str, aspect: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) => format!("change:{id}:{aspect}:{schema}"),
        None => format!("change:{id}:{aspect}"),
    }
}

/// Per-artifact keys nest under the change.
pub fn change_artifact(id: &str, aspect: &str, artifact_or_path: &str) -> String {
    format!("change:{id}:{aspect}:{artifact_or_path}")
}

pub fn schema_entity_prefix(name: &str) -> String {
    format!("schema:{name}:")
}

pub fn change_entity_prefix(id: &str) -> String {
    format!("change:{id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_entity_prefix_matches_all_its_own_keys() {
        let prefix = change_entity_prefix("add-caching");
        assert!(change("add-caching", "status", None).starts_with(&prefix));
        assert!(change("add-caching", "status", Some("rfc")).starts_with(&prefix));
        assert!(!change("add-caching-2", "status", None).starts_with(&prefix));
    }
}
