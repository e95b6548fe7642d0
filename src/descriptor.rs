//! The resolved tool descriptor and its builder.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::image::{ImageRef, ResolvedImageRef};
use crate::manifest::{ParameterSpec, ToolManifest};

/// The validated, resolved, immutable artifact ready for execution
/// scheduling.
///
/// Created only by [`build_descriptor`]; the workflow engine consumes it
/// read-only and hands it to the sandbox runner unchanged. The image digest
/// inside never changes for a given descriptor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub tool_id: String,
    pub version: String,
    pub resolved_image: ResolvedImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub parameters: Vec<ParameterSpec>,
}

/// Assemble a descriptor from a validated manifest and a resolved image.
///
/// Pure assembly with one defensive check: the manifest's declared reference
/// and the resolved reference must agree after normalization. A mismatch
/// means the caller paired outputs from different pipelines and fails with
/// [`RegistryError::InconsistentResolution`].
pub fn build_descriptor(
    manifest: ToolManifest,
    resolved_image: ResolvedImageRef,
) -> Result<ToolDescriptor> {
    let declared = ImageRef::from_str(&manifest.image_ref)?;

    if declared.repository != resolved_image.repository {
        return Err(RegistryError::InconsistentResolution {
            reason: format!(
                "declared repository '{}' does not match resolved '{}'",
                declared.repository, resolved_image.repository
            ),
        });
    }

    if let Some(declared_digest) = &declared.digest
        && declared_digest != &resolved_image.digest
    {
        return Err(RegistryError::InconsistentResolution {
            reason: format!(
                "declared digest '{}' does not match resolved '{}'",
                declared_digest, resolved_image.digest
            ),
        });
    }

    if declared.tag != resolved_image.tag {
        return Err(RegistryError::InconsistentResolution {
            reason: format!(
                "declared tag {:?} does not match resolved {:?}",
                declared.tag, resolved_image.tag
            ),
        });
    }

    Ok(ToolDescriptor {
        tool_id: manifest.tool_id,
        version: manifest.version,
        resolved_image,
        description: manifest.description,
        input_schema: manifest.input_schema,
        output_schema: manifest.output_schema,
        parameters: manifest.parameters,
    })
}
