//! EAV attribute flattening with store-level override resolution.
//!
//! A legacy entity stores each attribute as rows in a per-backend-type table,
//! one row per store that overrides the value. Flattening picks one
//! authoritative row per `(entity_id, attribute_id)` by store priority,
//! converts it by backend type and returns one sorted attribute list per
//! entity. Everything here is pure; the relational source does the I/O.

use std::collections::{BTreeMap, HashMap};

use crate::models::{
    AttributeDefinition, BackendType, FlattenedAttribute, RawAttributeValue, TypedValue,
};

/// Store id of the global/default scope.
pub const DEFAULT_STORE_ID: i64 = 0;

/// Attribute code synthesized from the entity table's own SKU column.
pub const SKU_ATTRIBUTE: &str = "sku";

/// Flattened attributes keyed by entity id.
pub type FlattenedEntities = BTreeMap<i64, Vec<FlattenedAttribute>>;

/// Resolves store-scoped attribute rows into one value per attribute.
#[derive(Debug, Clone)]
pub struct AttributeFlattener {
    store_priority: Vec<i64>,
}

impl AttributeFlattener {
    /// Creates a flattener for a store priority list, most preferred first.
    ///
    /// The default store is appended when absent so it always participates
    /// as the fallback ahead of stores that are not listed at all.
    pub fn new(store_priority: &[i64]) -> Self {
        let mut priority: Vec<i64> = Vec::with_capacity(store_priority.len() + 1);
        for &store in store_priority {
            if !priority.contains(&store) {
                priority.push(store);
            }
        }
        if !priority.contains(&DEFAULT_STORE_ID) {
            priority.push(DEFAULT_STORE_ID);
        }
        Self {
            store_priority: priority,
        }
    }

    /// Normalized priority list.
    pub fn store_priority(&self) -> &[i64] {
        &self.store_priority
    }

    /// Rank of a store; lower wins. Unlisted stores share the lowest rank.
    pub fn rank(&self, store_id: i64) -> usize {
        self.store_priority
            .iter()
            .position(|&s| s == store_id)
            .unwrap_or(self.store_priority.len())
    }

    /// Flattens raw rows into one sorted attribute list per entity.
    ///
    /// * `definitions` - attribute metadata; rows without a definition are ignored
    /// * `rows` - raw rows from every per-type table
    /// * `skus` - the entity table's own SKU column, always emitted as a
    ///   `static` attribute even when the entity has no per-type rows
    pub fn flatten(
        &self,
        definitions: &[AttributeDefinition],
        rows: &[RawAttributeValue],
        skus: &BTreeMap<i64, String>,
    ) -> FlattenedEntities {
        let by_id: HashMap<i64, &AttributeDefinition> =
            definitions.iter().map(|d| (d.attribute_id, d)).collect();

        // (entity_id, attribute_id) -> (rank, winning row). Ties keep the first row seen.
        let mut winners: HashMap<(i64, i64), (usize, &RawAttributeValue)> = HashMap::new();
        for row in rows {
            if !by_id.contains_key(&row.attribute_id) {
                continue;
            }
            let rank = self.rank(row.store_id);
            winners
                .entry((row.entity_id, row.attribute_id))
                .and_modify(|current| {
                    if rank < current.0 {
                        *current = (rank, row);
                    }
                })
                .or_insert((rank, row));
        }

        let mut entities: BTreeMap<i64, BTreeMap<String, FlattenedAttribute>> = BTreeMap::new();
        for ((entity_id, attribute_id), (_, row)) in winners {
            let Some(def) = by_id.get(&attribute_id) else {
                continue;
            };
            entities.entry(entity_id).or_default().insert(
                def.attribute_code.clone(),
                FlattenedAttribute {
                    attribute_code: def.attribute_code.clone(),
                    backend_type: def.backend_type,
                    value: TypedValue::convert(def.backend_type, row.value.as_deref()),
                },
            );
        }

        for (&entity_id, sku) in skus {
            entities.entry(entity_id).or_default().insert(
                SKU_ATTRIBUTE.to_string(),
                FlattenedAttribute {
                    attribute_code: SKU_ATTRIBUTE.to_string(),
                    backend_type: BackendType::Static,
                    value: TypedValue::convert(BackendType::Static, Some(sku)),
                },
            );
        }

        entities
            .into_iter()
            .map(|(entity_id, attrs)| (entity_id, attrs.into_values().collect()))
            .collect()
    }
}

/// Groups attribute definitions by the table their values live in.
///
/// `static` attributes are columns of the entity table and are left out.
pub fn group_by_backend(
    definitions: &[AttributeDefinition],
) -> BTreeMap<BackendType, Vec<&AttributeDefinition>> {
    let mut groups: BTreeMap<BackendType, Vec<&AttributeDefinition>> = BTreeMap::new();
    for def in definitions {
        if def.backend_type != BackendType::Static {
            groups.entry(def.backend_type).or_default().push(def);
        }
    }
    groups
}

/// Replaces option ids of select attributes with their labels.
///
/// Multi-select values (`"12,15"`) become comma-separated labels. Ids with
/// no known label are kept as-is.
pub fn apply_option_labels(
    attributes: &mut [FlattenedAttribute],
    definitions: &[AttributeDefinition],
    labels: &HashMap<i64, String>,
) {
    let select_codes: Vec<&str> = definitions
        .iter()
        .filter(|d| d.is_select)
        .map(|d| d.attribute_code.as_str())
        .collect();

    for attr in attributes.iter_mut() {
        if !select_codes.contains(&attr.attribute_code.as_str()) {
            continue;
        }
        let Some(raw) = attr.value.display() else {
            continue;
        };
        let resolved: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|id| {
                id.parse::<i64>()
                    .ok()
                    .and_then(|id| labels.get(&id).cloned())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect();
        if !resolved.is_empty() {
            attr.value = TypedValue::Text(resolved.join(", "));
        }
    }
}
