//! Artifact assembly — joining evaluation results with static metadata

use std::collections::BTreeMap;

use trellis_core::{
    ARTIFACT_VERSION, BuildError, BuildReport, BuilderArtifact, BuilderArtifactElement,
    CanonicalId, ContentHash, ElementMetadata,
};

use crate::evaluate::RegistryEntry;
use crate::graph::DefinitionCatalog;

/// Fold the registry output and the catalog's static metadata into a
/// validated artifact.
///
/// Every discovered definition must have been evaluated; a successful build's
/// element count equals the discovered-definition count, and any mismatch is
/// an internal pipeline bug.
pub fn assemble(
    catalog: &DefinitionCatalog,
    entries: BTreeMap<CanonicalId, RegistryEntry>,
    report: BuildReport,
) -> Result<BuilderArtifact, BuildError> {
    let mut elements = BTreeMap::new();

    for (id, catalog_entry) in catalog.iter() {
        let Some(evaluated) = entries.get(id) else {
            return Err(BuildError::ArtifactInvalid {
                reason: format!("definition '{id}' was never evaluated"),
            });
        };

        let payload = evaluated.payload.clone();
        let payload_content_hash = ContentHash::of_json(&payload);
        elements.insert(
            id.clone(),
            BuilderArtifactElement {
                canonical_id: id.clone(),
                kind: catalog_entry.definition.kind,
                payload,
                metadata: ElementMetadata {
                    source_path: catalog_entry.source_path.clone(),
                    source_content_hash: catalog_entry.source_content_hash.clone(),
                    payload_content_hash,
                },
            },
        );
    }

    if entries.len() != elements.len() {
        return Err(BuildError::ArtifactInvalid {
            reason: format!(
                "{} registrations for {} discovered definitions",
                entries.len(),
                elements.len()
            ),
        });
    }

    let artifact = BuilderArtifact {
        version: ARTIFACT_VERSION,
        elements,
        report,
    };
    artifact.validate()?;
    Ok(artifact)
}
