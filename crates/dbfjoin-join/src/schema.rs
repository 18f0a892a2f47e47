//! Merged attribute schema with per-attribute provenance.

use dbfjoin_common::{AttributeDescriptor, ValueType};
use dbfjoin_storage::RecordFileHeader;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Position of a secondary source in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub usize);

/// Where a merged attribute's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Attribute `index` of the primary stream.
    Primary { index: usize },
    /// Field `field` of secondary source `source`.
    Secondary { source: SourceId, field: usize },
}

/// One attribute of the merged schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAttributeDescriptor {
    pub name: String,
    pub value_type: ValueType,
    pub provenance: Provenance,
}

impl JoinAttributeDescriptor {
    /// Returns true if the primary stream supplies this attribute.
    pub fn is_primary(&self) -> bool {
        matches!(self.provenance, Provenance::Primary { .. })
    }

    /// Returns the name and type without provenance.
    pub fn descriptor(&self) -> AttributeDescriptor {
        AttributeDescriptor::new(&self.name, self.value_type)
    }
}

/// Primary attributes followed by every non-colliding secondary field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedSchema {
    attributes: Vec<JoinAttributeDescriptor>,
}

impl JoinedSchema {
    /// Merges primary attributes with the fields of each secondary source.
    ///
    /// Sources are processed in the given order and fields in file order. A
    /// secondary field whose name is already taken, compared
    /// case-insensitively, is dropped; the first claimant wins.
    pub fn merge(
        primary: &[AttributeDescriptor],
        secondaries: &[(SourceId, &RecordFileHeader)],
    ) -> Self {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut attributes = Vec::with_capacity(primary.len());

        for (index, attribute) in primary.iter().enumerate() {
            claimed.insert(attribute.name.to_ascii_lowercase());
            attributes.push(JoinAttributeDescriptor {
                name: attribute.name.clone(),
                value_type: attribute.value_type,
                provenance: Provenance::Primary { index },
            });
        }

        for (source, header) in secondaries {
            for (field_index, field) in header.fields().iter().enumerate() {
                if !claimed.insert(field.name.to_ascii_lowercase()) {
                    debug!(
                        source = source.0,
                        field = %field.name,
                        "dropping secondary field shadowed by an earlier attribute"
                    );
                    continue;
                }
                attributes.push(JoinAttributeDescriptor {
                    name: field.name.clone(),
                    value_type: field.value_type(),
                    provenance: Provenance::Secondary {
                        source: *source,
                        field: field_index,
                    },
                });
            }
        }

        Self { attributes }
    }

    /// Number of merged attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when neither side contributed an attribute.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns every attribute, primary ones first.
    pub fn attributes(&self) -> &[JoinAttributeDescriptor] {
        &self.attributes
    }

    /// Returns the attribute at schema position `index`.
    pub fn attribute(&self, index: usize) -> Option<&JoinAttributeDescriptor> {
        self.attributes.get(index)
    }

    /// Finds an attribute by name, case-insensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Names supplied by the primary stream, in schema order.
    pub fn primary_names(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.is_primary())
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Names supplied by secondary files, in schema order.
    pub fn secondary_names(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| !a.is_primary())
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Returns true if any of `names` is supplied by the primary stream.
    pub fn requires_primary<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| {
            self.position(n.as_ref())
                .is_some_and(|i| self.attributes[i].is_primary())
        })
    }

    /// Returns true if any of `names` is supplied by a secondary source.
    pub fn requires_secondary<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| {
            self.position(n.as_ref())
                .is_some_and(|i| !self.attributes[i].is_primary())
        })
    }

    /// Returns the plain descriptors of every attribute, in schema order.
    pub fn descriptors(&self) -> Vec<AttributeDescriptor> {
        self.attributes.iter().map(|a| a.descriptor()).collect()
    }
}
