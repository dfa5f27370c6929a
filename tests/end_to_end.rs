//! Whole-run tests against the in-memory target catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use eav_migrate::backends::{DryRunBackend, InMemoryCatalog, ModuleBackend, TargetBackend};
use eav_migrate::config::{Config, SourceMode};
use eav_migrate::context::{IdMappings, MigrationContext};
use eav_migrate::engine::run_migration;
use eav_migrate::error::AppError;
use eav_migrate::models::{
    OptionAxis, ProductType, ResourceKind, SourceAddress, SourceCategory, SourceCustomer,
    SourceProduct, TypedValue,
};
use eav_migrate::source::CatalogSource;

// ============================================================================
// Fixture source
// ============================================================================

#[derive(Default)]
struct FixtureSource {
    categories: Vec<SourceCategory>,
    products: Vec<SourceProduct>,
    children: HashMap<i64, Vec<SourceProduct>>,
    customers: Vec<SourceCustomer>,
}

#[async_trait]
impl CatalogSource for FixtureSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Rest
    }

    async fn categories(&self) -> Result<Vec<SourceCategory>, AppError> {
        Ok(self.categories.clone())
    }

    async fn products(&self) -> Result<Vec<SourceProduct>, AppError> {
        Ok(self.products.clone())
    }

    async fn children(&self, parent: &SourceProduct) -> Result<Vec<SourceProduct>, AppError> {
        Ok(self.children.get(&parent.entity_id).cloned().unwrap_or_default())
    }

    async fn customers(&self) -> Result<Vec<SourceCustomer>, AppError> {
        Ok(self.customers.clone())
    }
}

fn category(id: i64, parent: Option<i64>, level: i64, name: &str) -> SourceCategory {
    SourceCategory {
        entity_id: id,
        parent_id: parent,
        name: name.to_string(),
        url_key: None,
        description: None,
        level,
        position: 0,
        is_active: Some(true),
    }
}

fn product(id: i64, sku: &str, ty: ProductType, attrs: &[(&str, TypedValue)]) -> SourceProduct {
    let mut p = SourceProduct::new(id, sku, ty);
    for (code, value) in attrs {
        p.attributes.insert(code.to_string(), value.clone());
    }
    p
}

fn text(s: &str) -> TypedValue {
    TypedValue::Text(s.to_string())
}

fn fixture() -> FixtureSource {
    let mut mug = product(
        10,
        "MUG-1",
        ProductType::Simple,
        &[("name", text("Coffee Mug")), ("price", TypedValue::Decimal(12.0))],
    );
    mug.category_ids = vec![2];

    let mut tee = product(
        20,
        "TEE",
        ProductType::Configurable,
        &[("name", text("Tee")), ("price", TypedValue::Decimal(25.0))],
    );
    tee.category_ids = vec![3];
    tee.option_axes = vec![
        OptionAxis {
            code: "size".into(),
            label: "Size".into(),
        },
        OptionAxis {
            code: "color".into(),
            label: "Color".into(),
        },
    ];

    let hidden = [("visibility", TypedValue::Integer(1))];
    let tee_children = vec![
        product(
            21,
            "TEE-S-RED",
            ProductType::Simple,
            &[("size", text("S")), ("color", text("Red")), hidden[0].clone()],
        ),
        product(
            22,
            "TEE-M",
            ProductType::Simple,
            &[("size", text("M")), hidden[0].clone()],
        ),
    ];

    let mut products = vec![mug, tee];
    products.extend(tee_children.iter().cloned());

    FixtureSource {
        // Deliberately out of tree order.
        categories: vec![
            category(3, Some(2), 2, "Shirts"),
            category(1, None, 0, "Root Catalog"),
            category(2, Some(1), 1, "Apparel"),
        ],
        products,
        children: HashMap::from([(20, tee_children)]),
        customers: vec![
            SourceCustomer {
                entity_id: 100,
                email: Some("Ada@Example.com".into()),
                firstname: Some("Ada".into()),
                lastname: Some("Lovelace".into()),
                telephone: None,
                created_at: None,
                addresses: vec![SourceAddress {
                    street: vec!["1 Main St".into()],
                    city: Some("London".into()),
                    country_id: Some("GB".into()),
                    ..Default::default()
                }],
            },
            SourceCustomer {
                entity_id: 101,
                email: None,
                firstname: Some("Nobody".into()),
                lastname: None,
                telephone: None,
                created_at: None,
                addresses: Vec::new(),
            },
        ],
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.target.sales_channel_id = Some("sc_default".into());
    config.run.rate_limit_step_ms = 1000;
    config
}

async fn module_backend(catalog: &Arc<InMemoryCatalog>) -> Arc<dyn TargetBackend> {
    Arc::new(ModuleBackend::probe(&catalog.module_api()).await.unwrap())
}

async fn context(
    catalog: &Arc<InMemoryCatalog>,
    source: Arc<FixtureSource>,
    config: Config,
) -> MigrationContext {
    MigrationContext::new(config, source, module_backend(catalog).await, IdMappings::new())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let source = Arc::new(fixture());

    let first = context(&catalog, source.clone(), config()).await;
    let result = run_migration(&first, &ResourceKind::ALL).await;
    assert!(result.is_success());
    assert_eq!(result.summary.stats(ResourceKind::Categories).created, 2);
    assert_eq!(result.summary.stats(ResourceKind::Products).created, 2);
    assert_eq!(result.summary.stats(ResourceKind::Customers).created, 1);

    let products = catalog.products().len();
    let categories = catalog.categories().len();
    let customers = catalog.customers().len();
    let product_creates = catalog.calls("create_product");

    let second = context(&catalog, source, config()).await;
    let result = run_migration(&second, &ResourceKind::ALL).await;
    assert!(result.is_success());
    for kind in ResourceKind::ALL {
        assert_eq!(result.summary.stats(kind).created, 0, "{} created on second run", kind);
    }
    assert_eq!(result.summary.stats(ResourceKind::Products).updated, 2);
    assert_eq!(catalog.products().len(), products);
    assert_eq!(catalog.categories().len(), categories);
    assert_eq!(catalog.customers().len(), customers);
    assert_eq!(catalog.calls("create_product"), product_creates);
}

#[tokio::test]
async fn test_category_tree_is_created_parent_first() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let ctx = context(&catalog, Arc::new(fixture()), config()).await;

    let result = run_migration(&ctx, &[ResourceKind::Categories]).await;
    assert!(result.is_success());

    let created = catalog.categories();
    assert_eq!(created.len(), 2, "virtual root must not be created");
    assert_eq!(created[0].category.name, "Apparel");
    assert_eq!(created[0].category.parent_category_id, None);
    assert_eq!(created[1].category.name, "Shirts");
    assert_eq!(
        created[1].category.parent_category_id.as_deref(),
        Some(created[0].category.id.as_str())
    );
    assert_eq!(result.summary.stats(ResourceKind::Categories).skipped, 1);
}

#[tokio::test]
async fn test_configurable_product_variants_cover_every_axis() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let ctx = context(&catalog, Arc::new(fixture()), config()).await;

    let result = run_migration(&ctx, &[ResourceKind::Categories, ResourceKind::Products]).await;
    assert!(result.is_success());

    let products = catalog.products();
    // Children are only migrated as variants of their parent.
    assert_eq!(products.len(), 2);
    assert_eq!(result.summary.stats(ResourceKind::Products).skipped, 2);

    let tee = products
        .iter()
        .find(|p| p.product.external_id.as_deref() == Some("TEE"))
        .unwrap();
    let variants = catalog.variants_of(&tee.product.id);
    assert_eq!(variants.len(), 2);
    for variant in &variants {
        assert!(variant.options.contains_key("Size"));
        assert!(variant.options.contains_key("Color"));
        assert_eq!(variant.prices[0].amount, 2500);
    }

    let shirts = catalog
        .categories()
        .into_iter()
        .find(|c| c.category.name == "Shirts")
        .unwrap();
    assert_eq!(tee.category_ids, vec![shirts.category.id]);
    assert!(catalog.channel_products("sc_default").contains(&tee.product.id));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut config = config();
    config.run.dry_run = true;
    let backend: Arc<dyn TargetBackend> =
        Arc::new(DryRunBackend::new(module_backend(&catalog).await));
    let ctx = MigrationContext::new(config, Arc::new(fixture()), backend, IdMappings::new());

    let result = run_migration(&ctx, &ResourceKind::ALL).await;
    assert!(result.is_success());
    assert_eq!(result.summary.stats(ResourceKind::Products).created, 2);
    assert!(catalog.categories().is_empty());
    assert!(catalog.products().is_empty());
    assert!(catalog.customers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_creates_are_retried() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.fail_next("create_product", 429, 2);
    let ctx = context(&catalog, Arc::new(fixture()), config()).await;

    let result = run_migration(&ctx, &[ResourceKind::Products]).await;
    assert!(result.is_success());
    assert_eq!(result.summary.stats(ResourceKind::Products).failed, 0);
    assert_eq!(catalog.products().len(), 2);
    assert_eq!(catalog.calls("create_product"), 4);
}

#[tokio::test]
async fn test_failed_variants_are_completed_on_next_run() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let source = Arc::new(FixtureSource {
        products: fixture().products.into_iter().filter(|p| p.sku.starts_with("TEE")).collect(),
        children: fixture().children,
        ..Default::default()
    });

    catalog.fail_next("create_variant", 500, 1);
    let first = context(&catalog, source.clone(), config()).await;
    let result = run_migration(&first, &[ResourceKind::Products]).await;
    assert_eq!(result.summary.stats(ResourceKind::Products).failed, 1);
    let tee_id = catalog.products()[0].product.id.clone();
    assert!(catalog.variants_of(&tee_id).is_empty());

    let second = context(&catalog, source, config()).await;
    let result = run_migration(&second, &[ResourceKind::Products]).await;
    assert_eq!(result.summary.stats(ResourceKind::Products).updated, 1);
    assert_eq!(catalog.products().len(), 1);
    assert_eq!(catalog.variants_of(&tee_id).len(), 2);
}

#[tokio::test]
async fn test_customers_are_deduplicated_by_email() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut source = fixture();
    let mut twin = source.customers[0].clone();
    twin.entity_id = 102;
    twin.email = Some(" ada@example.COM ".into());
    source.customers.push(twin);

    let ctx = context(&catalog, Arc::new(source), config()).await;
    let result = run_migration(&ctx, &[ResourceKind::Customers]).await;

    // A missing email fails one entity, not the run.
    assert!(result.is_success());
    let stats = result.summary.stats(ResourceKind::Customers);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 1);

    let customers = catalog.customers();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].customer.email, "ada@example.com");
    assert_eq!(customers[0].addresses.len(), 1);
}

#[tokio::test]
async fn test_state_file_resumes_category_ids() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let catalog = Arc::new(InMemoryCatalog::new());
    let source = Arc::new(fixture());

    let mut config = config();
    config.run.state_file = Some(state_file.clone());

    let first = context(&catalog, source.clone(), config.clone()).await;
    assert!(run_migration(&first, &[ResourceKind::Categories]).await.is_success());
    assert!(state_file.exists());

    let mappings = IdMappings::load(&state_file).await.unwrap();
    assert_eq!(mappings.len(ResourceKind::Categories), 2);
    let second = MigrationContext::new(config, source, module_backend(&catalog).await, mappings);
    assert!(run_migration(&second, &[ResourceKind::Products]).await.is_success());

    let mug = catalog
        .products()
        .into_iter()
        .find(|p| p.product.external_id.as_deref() == Some("MUG-1"))
        .unwrap();
    assert_eq!(mug.category_ids.len(), 1);
    assert_eq!(catalog.calls("create_category"), 2);
}

#[tokio::test]
async fn test_category_found_after_failed_create_keeps_subtree() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.fail_after_write("create_category", 500, 1);
    let ctx = context(&catalog, Arc::new(fixture()), config()).await;

    let result = run_migration(&ctx, &[ResourceKind::Categories]).await;
    assert!(result.is_success());
    let stats = result.summary.stats(ResourceKind::Categories);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.failed, 0);

    let created = catalog.categories();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].category.name, "Apparel");
    assert_eq!(
        created[1].category.parent_category_id.as_deref(),
        Some(created[0].category.id.as_str())
    );
    assert_eq!(ctx.mappings.len(ResourceKind::Categories), 2);
}

#[tokio::test]
async fn test_failed_parent_category_fails_its_children() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.fail_next("create_category", 500, 1);
    let ctx = context(&catalog, Arc::new(fixture()), config()).await;

    let result = run_migration(&ctx, &[ResourceKind::Categories]).await;
    assert!(result.is_success());
    let stats = result.summary.stats(ResourceKind::Categories);
    assert_eq!(stats.created, 0);
    assert_eq!(stats.failed, 2);

    assert!(catalog.categories().is_empty());
    assert_eq!(catalog.calls("create_category"), 1);
    let child = result
        .summary
        .failures
        .iter()
        .find(|issue| issue.key == "3")
        .unwrap();
    assert!(child.message.contains("parent category 2 failed"));
}

#[tokio::test(start_paused = true)]
async fn test_same_named_products_stay_distinct_under_concurrency() {
    let catalog = Arc::new(InMemoryCatalog::new().with_latency(Duration::from_millis(50)));
    let tee = |id, sku| {
        product(
            id,
            sku,
            ProductType::Simple,
            &[("name", text("Tee")), ("price", TypedValue::Decimal(10.0))],
        )
    };
    let source = Arc::new(FixtureSource {
        products: vec![tee(1, "A-SKU"), tee(2, "B-SKU")],
        ..Default::default()
    });
    let mut config = config();
    config.run.concurrency = 4;
    let ctx = context(&catalog, source, config).await;

    let result = run_migration(&ctx, &[ResourceKind::Products]).await;
    assert!(result.is_success());
    let stats = result.summary.stats(ResourceKind::Products);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.failed, 0);

    let products = catalog.products();
    assert_eq!(products.len(), 2);
    let mut handles: Vec<&str> = products.iter().map(|p| p.product.handle.as_str()).collect();
    handles.sort_unstable();
    assert!(
        handles == ["tee", "tee-a-sku"] || handles == ["tee", "tee-b-sku"],
        "unexpected handles {:?}",
        handles
    );
    for stored in &products {
        let variants = catalog.variants_of(&stored.product.id);
        let sku = stored.product.external_id.clone();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].variant.sku, sku);
    }
}

#[tokio::test]
async fn test_missing_addresses_are_added_on_next_run() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let source = Arc::new(FixtureSource {
        customers: fixture().customers.into_iter().take(1).collect(),
        ..Default::default()
    });

    catalog.fail_next("create_address", 500, 1);
    let first = context(&catalog, source.clone(), config()).await;
    let result = run_migration(&first, &[ResourceKind::Customers]).await;
    assert_eq!(result.summary.stats(ResourceKind::Customers).created, 1);
    assert_eq!(result.summary.warnings.len(), 1);
    assert!(catalog.customers()[0].addresses.is_empty());

    let second = context(&catalog, source, config()).await;
    let result = run_migration(&second, &[ResourceKind::Customers]).await;
    let stats = result.summary.stats(ResourceKind::Customers);
    assert_eq!(stats.created, 0);
    assert_eq!(stats.updated, 1);
    assert_eq!(catalog.customers().len(), 1);
    assert_eq!(catalog.customers()[0].addresses.len(), 1);

    let third = context(&catalog, Arc::new(fixture()), config()).await;
    let result = run_migration(&third, &[ResourceKind::Customers]).await;
    assert_eq!(result.summary.stats(ResourceKind::Customers).skipped, 1);
    assert_eq!(catalog.customers()[0].addresses.len(), 1);
}
