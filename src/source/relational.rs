//! Direct reader over a PostgreSQL copy of the legacy schema.
//!
//! Entity tables carry only static columns; every other field lives in one
//! `<entity>_entity_<type>` table per backend type with a row per store
//! override. Rows are read as text and handed to [`AttributeFlattener`].
//!
//! Table names are never built from input: they come from the fixed entity
//! prefixes below and [`BackendType::VALUE_TABLES`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::config::{SourceConfig, SourceMode};
use crate::error::AppError;
use crate::models::{
    AttributeDefinition, BackendType, FlattenedAttribute, OptionAxis, ProductType,
    RawAttributeValue, SourceAddress, SourceCategory, SourceCustomer, SourceProduct, StockInfo,
    TypedValue,
};
use crate::source::flatten::{apply_option_labels, group_by_backend, AttributeFlattener};
use crate::source::CatalogSource;

const PRODUCT_ENTITY: &str = "catalog_product";
const CATEGORY_ENTITY: &str = "catalog_category";

/// Link type of grouped product members in `catalog_product_link`.
const LINK_TYPE_GROUPED: i64 = 3;

pub struct RelationalSource {
    pool: Pool,
    flattener: AttributeFlattener,
}

impl RelationalSource {
    /// Creates a pooled reader. No connection is opened until first use.
    pub fn connect(database_url: &str, store_priority: &[i64]) -> Result<Self, AppError> {
        let pg_config: tokio_postgres::Config = database_url.parse().map_err(|e| {
            AppError::Internal(format!("Invalid PostgreSQL connection string: {}", e))
        })?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(8)
            .build()
            .map_err(|e| AppError::Pool(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self {
            pool,
            flattener: AttributeFlattener::new(store_priority),
        })
    }

    pub async fn from_config(config: &SourceConfig) -> Result<Self, AppError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| AppError::MissingCredentials("source.database_url".into()))?;
        let source = Self::connect(url, &config.store_priority)?;
        // Fail fast on a bad DSN instead of on the first resource.
        source.conn().await?;
        Ok(source)
    }

    async fn conn(&self) -> Result<Object, AppError> {
        Ok(self.pool.get().await?)
    }

    async fn rows(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError> {
        let conn = self.conn().await?;
        Ok(conn.query(sql, params).await?)
    }

    // ------------------------------------------------------------------------
    // EAV plumbing
    // ------------------------------------------------------------------------

    async fn definitions(&self, entity_type: &str) -> Result<Vec<AttributeDefinition>, AppError> {
        let rows = self
            .rows(
                "SELECT a.attribute_id::int8, a.attribute_code, a.backend_type, \
                        COALESCE(a.frontend_input, '') \
                 FROM eav_attribute a \
                 JOIN eav_entity_type t ON t.entity_type_id = a.entity_type_id \
                 WHERE t.entity_type_code = $1",
                &[&entity_type],
            )
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let backend: String = row.try_get(2)?;
            let Some(backend_type) = BackendType::parse(&backend) else {
                continue;
            };
            let input: String = row.try_get(3)?;
            definitions.push(AttributeDefinition {
                attribute_id: row.try_get(0)?,
                attribute_code: row.try_get(1)?,
                backend_type,
                is_select: input == "select" || input == "multiselect",
            });
        }
        Ok(definitions)
    }

    /// Reads value rows of every non-static attribute, optionally for some entities.
    async fn values(
        &self,
        entity_type: &str,
        definitions: &[AttributeDefinition],
        entity_ids: Option<&Vec<i64>>,
    ) -> Result<Vec<RawAttributeValue>, AppError> {
        let mut values = Vec::new();
        for (backend_type, defs) in group_by_backend(definitions) {
            let attribute_ids: Vec<i64> = defs.iter().map(|d| d.attribute_id).collect();
            let sql = format!(
                "SELECT entity_id::int8, attribute_id::int8, store_id::int8, value::text \
                 FROM {}_entity_{} \
                 WHERE attribute_id::int8 = ANY($1) \
                   AND ($2::int8[] IS NULL OR entity_id::int8 = ANY($2))",
                entity_type,
                backend_type.as_str()
            );
            for row in self.rows(&sql, &[&attribute_ids, &entity_ids]).await? {
                values.push(RawAttributeValue {
                    entity_id: row.try_get(0)?,
                    attribute_id: row.try_get(1)?,
                    store_id: row.try_get(2)?,
                    value: row.try_get(3)?,
                });
            }
        }
        Ok(values)
    }

    async fn option_labels(&self) -> Result<HashMap<i64, String>, AppError> {
        let rows = self
            .rows(
                "SELECT option_id::int8, store_id::int8, value FROM eav_attribute_option_value",
                &[],
            )
            .await?;
        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            labels.push((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?));
        }
        Ok(pick_labels(labels, &self.flattener))
    }

    // ------------------------------------------------------------------------
    // Products
    // ------------------------------------------------------------------------

    async fn load_products(
        &self,
        entity_ids: Option<Vec<i64>>,
    ) -> Result<Vec<SourceProduct>, AppError> {
        let ids = entity_ids.as_ref();
        let entity_rows = self
            .rows(
                "SELECT entity_id::int8, sku, type_id FROM catalog_product_entity \
                 WHERE ($1::int8[] IS NULL OR entity_id::int8 = ANY($1)) \
                 ORDER BY entity_id",
                &[&ids],
            )
            .await?;

        let mut entities: Vec<(i64, String, String)> = Vec::with_capacity(entity_rows.len());
        for row in entity_rows {
            let sku: Option<String> = row.try_get(1)?;
            entities.push((row.try_get(0)?, sku.unwrap_or_default(), row.try_get(2)?));
        }
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let definitions = self.definitions(PRODUCT_ENTITY).await?;
        let values = self.values(PRODUCT_ENTITY, &definitions, ids).await?;
        let skus: BTreeMap<i64, String> = entities
            .iter()
            .map(|(id, sku, _)| (*id, sku.clone()))
            .collect();
        let mut flattened = self.flattener.flatten(&definitions, &values, &skus);

        if definitions.iter().any(|d| d.is_select) {
            let labels = self.option_labels().await?;
            for attrs in flattened.values_mut() {
                apply_option_labels(attrs, &definitions, &labels);
            }
        }

        let axes = self.option_axes(ids).await?;
        let categories = self.category_links(ids).await?;
        let media = self.media(ids).await?;
        let stock = self.stock(ids).await?;

        let products = entities
            .into_iter()
            .filter(|(_, sku, _)| !sku.trim().is_empty())
            .map(|(entity_id, sku, type_id)| {
                let attrs = flattened.remove(&entity_id).unwrap_or_default();
                let mut product = SourceProduct::from_flattened(
                    entity_id,
                    sku,
                    ProductType::from_type_id(&type_id),
                    &attrs,
                );
                product.option_axes = axes.get(&entity_id).cloned().unwrap_or_default();
                product.category_ids = categories.get(&entity_id).cloned().unwrap_or_default();
                product.media = media.get(&entity_id).cloned().unwrap_or_default();
                product.stock = stock.get(&entity_id).copied();
                product
            })
            .collect();
        Ok(products)
    }

    async fn option_axes(
        &self,
        ids: Option<&Vec<i64>>,
    ) -> Result<HashMap<i64, Vec<OptionAxis>>, AppError> {
        let rows = self
            .rows(
                "SELECT sa.product_id::int8, a.attribute_code, \
                        COALESCE(l.value, a.frontend_label, a.attribute_code) \
                 FROM catalog_product_super_attribute sa \
                 JOIN eav_attribute a ON a.attribute_id = sa.attribute_id \
                 LEFT JOIN catalog_product_super_attribute_label l \
                   ON l.product_super_attribute_id = sa.product_super_attribute_id \
                  AND l.store_id = 0 \
                 WHERE ($1::int8[] IS NULL OR sa.product_id::int8 = ANY($1)) \
                 ORDER BY sa.product_id, sa.position",
                &[&ids],
            )
            .await?;
        let mut axes: HashMap<i64, Vec<OptionAxis>> = HashMap::new();
        for row in rows {
            axes.entry(row.try_get(0)?).or_default().push(OptionAxis {
                code: row.try_get(1)?,
                label: row.try_get(2)?,
            });
        }
        Ok(axes)
    }

    async fn category_links(
        &self,
        ids: Option<&Vec<i64>>,
    ) -> Result<HashMap<i64, Vec<i64>>, AppError> {
        let rows = self
            .rows(
                "SELECT product_id::int8, category_id::int8 FROM catalog_category_product \
                 WHERE ($1::int8[] IS NULL OR product_id::int8 = ANY($1)) \
                 ORDER BY product_id, position, category_id",
                &[&ids],
            )
            .await?;
        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            links.entry(row.try_get(0)?).or_default().push(row.try_get(1)?);
        }
        Ok(links)
    }

    async fn media(&self, ids: Option<&Vec<i64>>) -> Result<HashMap<i64, Vec<String>>, AppError> {
        let rows = self
            .rows(
                "SELECT e.entity_id::int8, g.value \
                 FROM catalog_product_entity_media_gallery_value_to_entity e \
                 JOIN catalog_product_entity_media_gallery g ON g.value_id = e.value_id \
                 LEFT JOIN catalog_product_entity_media_gallery_value v \
                   ON v.value_id = g.value_id AND v.entity_id = e.entity_id AND v.store_id = 0 \
                 WHERE COALESCE(g.disabled, 0) = 0 AND COALESCE(v.disabled, 0) = 0 \
                   AND ($1::int8[] IS NULL OR e.entity_id::int8 = ANY($1)) \
                 ORDER BY e.entity_id, COALESCE(v.position, 0), g.value_id",
                &[&ids],
            )
            .await?;
        let mut media: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let path: Option<String> = row.try_get(1)?;
            if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
                let entry = media.entry(row.try_get(0)?).or_default();
                if !entry.contains(&path) {
                    entry.push(path);
                }
            }
        }
        Ok(media)
    }

    async fn stock(&self, ids: Option<&Vec<i64>>) -> Result<HashMap<i64, StockInfo>, AppError> {
        let rows = self
            .rows(
                "SELECT product_id::int8, COALESCE(qty, 0)::float8, \
                        COALESCE(is_in_stock, 0) <> 0, COALESCE(manage_stock, 1) <> 0 \
                 FROM cataloginventory_stock_item \
                 WHERE ($1::int8[] IS NULL OR product_id::int8 = ANY($1))",
                &[&ids],
            )
            .await?;
        let mut stock = HashMap::new();
        for row in rows {
            stock.insert(
                row.try_get(0)?,
                StockInfo {
                    qty: row.try_get(1)?,
                    is_in_stock: row.try_get(2)?,
                    manage_stock: row.try_get(3)?,
                },
            );
        }
        Ok(stock)
    }

    async fn child_ids(&self, parent: &SourceProduct) -> Result<Vec<i64>, AppError> {
        let rows = match parent.product_type {
            ProductType::Simple => return Ok(Vec::new()),
            ProductType::Configurable => {
                self.rows(
                    "SELECT product_id::int8 FROM catalog_product_super_link \
                     WHERE parent_id::int8 = $1 ORDER BY product_id",
                    &[&parent.entity_id],
                )
                .await?
            }
            ProductType::Parent => {
                self.rows(
                    "SELECT linked_product_id::int8 FROM catalog_product_link \
                     WHERE product_id::int8 = $1 AND link_type_id::int8 = $2 \
                     ORDER BY linked_product_id",
                    &[&parent.entity_id, &LINK_TYPE_GROUPED],
                )
                .await?
            }
        };
        rows.iter()
            .map(|row| row.try_get::<_, i64>(0).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl CatalogSource for RelationalSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Relational
    }

    async fn categories(&self) -> Result<Vec<SourceCategory>, AppError> {
        let rows = self
            .rows(
                "SELECT entity_id::int8, parent_id::int8, level::int8, position::int8 \
                 FROM catalog_category_entity ORDER BY entity_id",
                &[],
            )
            .await?;
        let mut tree = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_id: i64 = row.try_get(0)?;
            let parent_id: Option<i64> = row.try_get(1)?;
            let level: Option<i64> = row.try_get(2)?;
            let position: Option<i64> = row.try_get(3)?;
            tree.push((entity_id, parent_id, level.unwrap_or(0), position.unwrap_or(0)));
        }

        let definitions = self.definitions(CATEGORY_ENTITY).await?;
        let values = self.values(CATEGORY_ENTITY, &definitions, None).await?;
        let mut flattened = self.flattener.flatten(&definitions, &values, &BTreeMap::new());

        Ok(tree
            .into_iter()
            .map(|(entity_id, parent_id, level, position)| {
                let attrs = flattened.remove(&entity_id).unwrap_or_default();
                category_from_attributes(entity_id, parent_id, level, position, &attrs)
            })
            .collect())
    }

    async fn products(&self) -> Result<Vec<SourceProduct>, AppError> {
        self.load_products(None).await
    }

    async fn children(&self, parent: &SourceProduct) -> Result<Vec<SourceProduct>, AppError> {
        let ids = self.child_ids(parent).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.load_products(Some(ids)).await
    }

    async fn customers(&self) -> Result<Vec<SourceCustomer>, AppError> {
        let rows = self
            .rows(
                "SELECT entity_id::int8, email, firstname, lastname, created_at::text, \
                        default_billing::int8, default_shipping::int8 \
                 FROM customer_entity ORDER BY entity_id",
                &[],
            )
            .await?;
        let address_rows = self
            .rows(
                "SELECT entity_id::int8, parent_id::int8, firstname, lastname, company, street, \
                        city, region, postcode, country_id, telephone \
                 FROM customer_address_entity ORDER BY parent_id, entity_id",
                &[],
            )
            .await?;

        let mut addresses: HashMap<i64, Vec<(i64, SourceAddress)>> = HashMap::new();
        for row in address_rows {
            let street: Option<String> = row.try_get(5)?;
            let address = SourceAddress {
                firstname: row.try_get(2)?,
                lastname: row.try_get(3)?,
                company: row.try_get(4)?,
                street: split_street(street.as_deref()),
                city: row.try_get(6)?,
                region: row.try_get(7)?,
                postcode: row.try_get(8)?,
                country_id: row.try_get(9)?,
                telephone: row.try_get(10)?,
                default_billing: false,
                default_shipping: false,
            };
            let parent: Option<i64> = row.try_get(1)?;
            if let Some(parent) = parent {
                addresses
                    .entry(parent)
                    .or_default()
                    .push((row.try_get(0)?, address));
            }
        }

        let mut customers = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_id: i64 = row.try_get(0)?;
            let default_billing: Option<i64> = row.try_get(5)?;
            let default_shipping: Option<i64> = row.try_get(6)?;
            let book: Vec<SourceAddress> = addresses
                .remove(&entity_id)
                .unwrap_or_default()
                .into_iter()
                .map(|(id, mut address)| {
                    address.default_billing = default_billing == Some(id);
                    address.default_shipping = default_shipping == Some(id);
                    address
                })
                .collect();
            let telephone = book
                .iter()
                .find(|a| a.default_billing)
                .or(book.first())
                .and_then(|a| a.telephone.clone());
            customers.push(SourceCustomer {
                entity_id,
                email: row.try_get(1)?,
                firstname: row.try_get(2)?,
                lastname: row.try_get(3)?,
                telephone,
                created_at: row.try_get(4)?,
                addresses: book,
            });
        }
        Ok(customers)
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Picks one label per option id by store priority.
fn pick_labels(
    rows: Vec<(i64, i64, Option<String>)>,
    flattener: &AttributeFlattener,
) -> HashMap<i64, String> {
    let mut best: HashMap<i64, (usize, String)> = HashMap::new();
    for (option_id, store_id, value) in rows {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let rank = flattener.rank(store_id);
        match best.get(&option_id) {
            Some((current, _)) if *current <= rank => {}
            _ => {
                best.insert(option_id, (rank, value));
            }
        }
    }
    best.into_iter().map(|(id, (_, label))| (id, label)).collect()
}

fn category_from_attributes(
    entity_id: i64,
    parent_id: Option<i64>,
    level: i64,
    position: i64,
    attrs: &[FlattenedAttribute],
) -> SourceCategory {
    let get = |code: &str| {
        attrs
            .iter()
            .find(|a| a.attribute_code == code)
            .map(|a| &a.value)
            .filter(|v| !v.is_null())
    };
    let text = |code: &str| {
        get(code)
            .and_then(TypedValue::display)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    SourceCategory {
        entity_id,
        parent_id: parent_id.filter(|&p| p != 0),
        name: text("name").unwrap_or_else(|| format!("Category {}", entity_id)),
        url_key: text("url_key"),
        description: text("description"),
        level,
        position,
        is_active: get("is_active").and_then(TypedValue::as_i64).map(|v| v != 0),
    }
}

fn split_street(street: Option<&str>) -> Vec<String> {
    street
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(code: &str, backend_type: BackendType, raw: &str) -> FlattenedAttribute {
        FlattenedAttribute {
            attribute_code: code.to_string(),
            backend_type,
            value: TypedValue::convert(backend_type, Some(raw)),
        }
    }

    #[test]
    fn test_pick_labels_by_store_priority() {
        let flattener = AttributeFlattener::new(&[2]);
        let rows = vec![
            (49, 0, Some("Red".to_string())),
            (49, 2, Some("Rouge".to_string())),
            (50, 0, Some("Blue".to_string())),
            (50, 5, Some("Azul".to_string())),
            (51, 2, Some("  ".to_string())),
            (51, 0, Some("Green".to_string())),
        ];
        let labels = pick_labels(rows, &flattener);
        assert_eq!(labels.get(&49).map(String::as_str), Some("Rouge"));
        assert_eq!(labels.get(&50).map(String::as_str), Some("Blue"));
        assert_eq!(labels.get(&51).map(String::as_str), Some("Green"));
    }

    #[test]
    fn test_category_from_attributes() {
        let attrs = vec![
            attr("name", BackendType::Varchar, "Shoes"),
            attr("url_key", BackendType::Varchar, "shoes"),
            attr("is_active", BackendType::Int, "0"),
        ];
        let category = category_from_attributes(7, Some(2), 2, 1, &attrs);
        assert_eq!(category.name, "Shoes");
        assert_eq!(category.url_key.as_deref(), Some("shoes"));
        assert_eq!(category.is_active, Some(false));
        assert_eq!(category.parent_id, Some(2));
    }

    #[test]
    fn test_category_without_flag_or_name() {
        let category = category_from_attributes(9, Some(0), 0, 0, &[]);
        assert_eq!(category.name, "Category 9");
        assert_eq!(category.is_active, None);
        assert_eq!(category.parent_id, None);
    }

    #[test]
    fn test_split_street() {
        assert_eq!(split_street(Some("Main 1\n\nApt 2 ")), vec!["Main 1", "Apt 2"]);
        assert!(split_street(None).is_empty());
    }
}
