//! Default storage class rewrite for GKE.
//!
//! Fresh GKE clusters bind volumes immediately. The deployer clones the
//! default class with `volumeBindingMode: WaitForFirstConsumer` and demotes
//! the original.

use serde_yaml::Value;

use crate::error::DriverError;

/// Name of the cloned storage class.
pub const CUSTOMIZED_CLASS: &str = "standard-customized";

/// Annotations marking the default class, newest first.
pub const DEFAULT_CLASS_ANNOTATIONS: [&str; 2] = [
    "storageclass.kubernetes.io/is-default-class",
    "storageclass.beta.kubernetes.io/is-default-class",
];

/// Binding mode set on the clone.
const BINDING_MODE: &str = "WaitForFirstConsumer";

/// Metadata fields populated by the API server.
const SERVER_FIELDS: [&str; 5] = [
    "uid",
    "resourceVersion",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];

const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Escapes dots for use as a key in a kubectl jsonpath filter.
#[must_use]
pub fn jsonpath_key(annotation: &str) -> String {
    annotation.replace('.', "\\.")
}

/// Rewrites a storage class manifest into the customized clone.
///
/// The clone keeps provisioner, parameters and annotations (so it becomes
/// the default), is renamed to `new_name`, and waits for the first consumer
/// before binding.
///
/// # Errors
///
/// Returns [`DriverError::InvalidManifest`] if the manifest is not a YAML
/// mapping with a `metadata` mapping.
pub fn customize(manifest: &str, new_name: &str) -> Result<String, DriverError> {
    let mut root: Value = serde_yaml::from_str(manifest).map_err(|e| invalid(e.to_string()))?;
    let doc = root
        .as_mapping_mut()
        .ok_or_else(|| invalid("manifest is not a mapping"))?;

    let metadata = doc
        .get_mut("metadata")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| invalid("manifest has no metadata"))?;

    metadata.insert(Value::from("name"), Value::from(new_name));
    for field in SERVER_FIELDS {
        metadata.remove(field);
    }
    if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_mapping_mut) {
        annotations.remove(LAST_APPLIED);
    }

    doc.insert(Value::from("volumeBindingMode"), Value::from(BINDING_MODE));

    serde_yaml::to_string(&root).map_err(|e| invalid(e.to_string()))
}

/// JSON merge patch setting every default-class annotation on the original
/// class to `"false"`.
#[must_use]
pub fn demote_patch() -> String {
    let annotations: serde_json::Map<String, serde_json::Value> = DEFAULT_CLASS_ANNOTATIONS
        .iter()
        .map(|annotation| ((*annotation).to_string(), serde_json::Value::from("false")))
        .collect();
    serde_json::json!({ "metadata": { "annotations": annotations } }).to_string()
}

fn invalid(message: impl Into<String>) -> DriverError {
    DriverError::InvalidManifest {
        message: message.into(),
    }
}
