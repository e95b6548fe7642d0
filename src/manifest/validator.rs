//! Strict manifest validation.
//!
//! One pass over the raw document, collecting every violation instead of
//! stopping at the first, so a tool author sees the complete defect list.
//! Purely functional: no I/O, no mutation of the input.
//!
//! Strictness policy: unknown fields are rejected at every level. A typo'd
//! field silently ignored here would surface much later as a broken tool at
//! execution time, on the other side of the trust boundary.

use std::str::FromStr;

use serde_json::Value;

use crate::error::{RegistryError, Result, SchemaViolation};
use crate::image::ImageRef;
use crate::manifest::types::ParameterKind;

/// Maximum nesting depth tolerated inside an I/O schema document.
const MAX_SCHEMA_DEPTH: usize = 64;

const TOP_LEVEL_FIELDS: [&str; 7] = [
    "tool_id",
    "version",
    "image_ref",
    "description",
    "input_schema",
    "output_schema",
    "parameters",
];

const PARAMETER_FIELDS: [&str; 5] = ["name", "kind", "default", "required", "description"];

/// Validate a raw manifest document against the manifest schema.
///
/// Returns `Ok(())` for a conforming document, otherwise
/// [`RegistryError::SchemaViolations`] carrying every violation found.
pub fn validate(document: &Value) -> Result<()> {
    let mut violations = Vec::new();

    let Some(root) = document.as_object() else {
        return Err(RegistryError::SchemaViolations {
            violations: vec![SchemaViolation::new("", "manifest must be an object")],
        });
    };

    for key in root.keys() {
        if !TOP_LEVEL_FIELDS.contains(&key.as_str()) {
            violations.push(SchemaViolation::new(key, "unknown field"));
        }
    }

    check_tool_id(root.get("tool_id"), &mut violations);
    check_version(root.get("version"), &mut violations);
    check_image_ref(root.get("image_ref"), &mut violations);

    if let Some(description) = root.get("description")
        && !description.is_string()
    {
        violations.push(SchemaViolation::new("description", "must be a string"));
    }

    check_io_schema(document, root.get("input_schema"), "input_schema", &mut violations);
    check_io_schema(document, root.get("output_schema"), "output_schema", &mut violations);
    check_parameters(root.get("parameters"), &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::SchemaViolations { violations })
    }
}

fn check_tool_id(value: Option<&Value>, violations: &mut Vec<SchemaViolation>) {
    match value {
        None => violations.push(SchemaViolation::new("tool_id", "required field is missing")),
        Some(Value::String(id)) if id.trim().is_empty() => {
            violations.push(SchemaViolation::new("tool_id", "must not be empty"));
        }
        Some(Value::String(_)) => {}
        Some(_) => violations.push(SchemaViolation::new("tool_id", "must be a string")),
    }
}

fn check_version(value: Option<&Value>, violations: &mut Vec<SchemaViolation>) {
    match value {
        None => violations.push(SchemaViolation::new("version", "required field is missing")),
        Some(Value::String(version)) => {
            if let Err(e) = semver::Version::parse(version) {
                violations.push(SchemaViolation::new(
                    "version",
                    format!("not a semantic version: {}", e),
                ));
            }
        }
        Some(_) => violations.push(SchemaViolation::new("version", "must be a string")),
    }
}

fn check_image_ref(value: Option<&Value>, violations: &mut Vec<SchemaViolation>) {
    match value {
        None => violations.push(SchemaViolation::new("image_ref", "required field is missing")),
        Some(Value::String(reference)) => {
            if let Err(e) = ImageRef::from_str(reference) {
                violations.push(SchemaViolation::new("image_ref", e.to_string()));
            }
        }
        Some(_) => violations.push(SchemaViolation::new("image_ref", "must be a string")),
    }
}

/// Validate an `input_schema`/`output_schema` document.
///
/// The document must be an object, every `$ref` must be a local reference
/// that resolves within the manifest, reference chains must not cycle, and
/// nesting is depth-bounded.
fn check_io_schema(
    manifest_root: &Value,
    value: Option<&Value>,
    path: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    match value {
        None => violations.push(SchemaViolation::new(path, "required field is missing")),
        Some(schema) if !schema.is_object() => {
            violations.push(SchemaViolation::new(path, "must be a schema object"));
        }
        Some(schema) => {
            let mut ref_stack = Vec::new();
            walk_schema(manifest_root, schema, path, &mut ref_stack, 0, violations);
        }
    }
}

fn walk_schema(
    manifest_root: &Value,
    node: &Value,
    path: &str,
    ref_stack: &mut Vec<String>,
    depth: usize,
    violations: &mut Vec<SchemaViolation>,
) {
    if depth > MAX_SCHEMA_DEPTH {
        violations.push(SchemaViolation::new(
            path,
            format!("schema nesting exceeds {} levels", MAX_SCHEMA_DEPTH),
        ));
        return;
    }

    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref") {
                check_reference(
                    manifest_root,
                    reference,
                    &format!("{}/$ref", path),
                    ref_stack,
                    depth,
                    violations,
                );
            }
            for (key, child) in map {
                if key == "$ref" {
                    continue;
                }
                walk_schema(
                    manifest_root,
                    child,
                    &format!("{}/{}", path, key),
                    ref_stack,
                    depth + 1,
                    violations,
                );
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                walk_schema(
                    manifest_root,
                    child,
                    &format!("{}/{}", path, index),
                    ref_stack,
                    depth + 1,
                    violations,
                );
            }
        }
        _ => {}
    }
}

/// Check a single `$ref`: local-only, resolvable, acyclic.
fn check_reference(
    manifest_root: &Value,
    reference: &Value,
    path: &str,
    ref_stack: &mut Vec<String>,
    depth: usize,
    violations: &mut Vec<SchemaViolation>,
) {
    let Some(target) = reference.as_str() else {
        violations.push(SchemaViolation::new(path, "$ref must be a string"));
        return;
    };

    let Some(pointer) = target.strip_prefix('#') else {
        violations.push(SchemaViolation::new(
            path,
            format!("external reference '{}' is not allowed", target),
        ));
        return;
    };

    let Some(resolved) = manifest_root.pointer(pointer) else {
        violations.push(SchemaViolation::new(
            path,
            format!("unresolved reference '{}'", target),
        ));
        return;
    };

    if ref_stack.iter().any(|seen| seen == target) {
        violations.push(SchemaViolation::new(
            path,
            format!("reference cycle through '{}'", target),
        ));
        return;
    }

    ref_stack.push(target.to_string());
    walk_schema(manifest_root, resolved, path, ref_stack, depth + 1, violations);
    ref_stack.pop();
}

fn check_parameters(value: Option<&Value>, violations: &mut Vec<SchemaViolation>) {
    let Some(parameters) = value else {
        return; // optional, defaults to empty
    };

    let Some(entries) = parameters.as_array() else {
        violations.push(SchemaViolation::new("parameters", "must be an array"));
        return;
    };

    let mut seen_names: Vec<&str> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let path = format!("parameters/{}", index);

        let Some(map) = entry.as_object() else {
            violations.push(SchemaViolation::new(&path, "must be an object"));
            continue;
        };

        for key in map.keys() {
            if !PARAMETER_FIELDS.contains(&key.as_str()) {
                violations.push(SchemaViolation::new(
                    format!("{}/{}", path, key),
                    "unknown field",
                ));
            }
        }

        match map.get("name") {
            None => violations.push(SchemaViolation::new(
                format!("{}/name", path),
                "required field is missing",
            )),
            Some(Value::String(name)) if name.trim().is_empty() => {
                violations.push(SchemaViolation::new(
                    format!("{}/name", path),
                    "must not be empty",
                ));
            }
            Some(Value::String(name)) => {
                if seen_names.contains(&name.as_str()) {
                    violations.push(SchemaViolation::new(
                        format!("{}/name", path),
                        format!("duplicate parameter name '{}'", name),
                    ));
                } else {
                    seen_names.push(name);
                }
            }
            Some(_) => violations.push(SchemaViolation::new(
                format!("{}/name", path),
                "must be a string",
            )),
        }

        match map.get("kind") {
            None => violations.push(SchemaViolation::new(
                format!("{}/kind", path),
                "required field is missing",
            )),
            Some(Value::String(kind)) => {
                if !ParameterKind::TAGS.contains(&kind.as_str()) {
                    violations.push(SchemaViolation::new(
                        format!("{}/kind", path),
                        format!(
                            "unknown kind '{}', expected one of: {}",
                            kind,
                            ParameterKind::TAGS.join(", ")
                        ),
                    ));
                }
            }
            Some(_) => violations.push(SchemaViolation::new(
                format!("{}/kind", path),
                "must be a string",
            )),
        }

        if let Some(required) = map.get("required")
            && !required.is_boolean()
        {
            violations.push(SchemaViolation::new(
                format!("{}/required", path),
                "must be a boolean",
            ));
        }

        if let Some(description) = map.get("description")
            && !description.is_string()
        {
            violations.push(SchemaViolation::new(
                format!("{}/description", path),
                "must be a string",
            ));
        }
    }
}
