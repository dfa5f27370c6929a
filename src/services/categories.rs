//! Category tree migration.
//!
//! Categories are visited strictly in tree order, one at a time, so every
//! parent has a target id before its children are created.

use std::collections::HashMap;

use serde_json::json;

use crate::context::MigrationContext;
use crate::error::AppError;
use crate::models::{make_handle, NewCategory, ResourceKind, SourceCategory, TargetCategory};
use crate::services::Upserted;

/// Migration state of one source category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryState {
    Pending,
    /// Target id known; `None` for the virtual root.
    Resolved(Option<String>),
    Failed,
}

pub struct CategoryTreeMigrator<'a> {
    ctx: &'a MigrationContext,
    states: HashMap<i64, CategoryState>,
}

impl<'a> CategoryTreeMigrator<'a> {
    pub fn new(ctx: &'a MigrationContext) -> Self {
        Self {
            ctx,
            states: HashMap::new(),
        }
    }

    /// Fetches every source category and migrates the tree.
    pub async fn run(self) -> Result<HashMap<i64, CategoryState>, AppError> {
        let source = self.ctx.source.clone();
        let categories = self
            .ctx
            .retry()
            .run("fetch categories", || source.categories())
            .await?;
        Ok(self.migrate(categories).await)
    }

    /// Migrates the given categories, returning the final state of each.
    pub async fn migrate(mut self, categories: Vec<SourceCategory>) -> HashMap<i64, CategoryState> {
        let categories = tree_order(categories);
        self.ctx.reporter.touch(ResourceKind::Categories);
        for category in &categories {
            self.states.insert(category.entity_id, CategoryState::Pending);
        }

        for category in &categories {
            let state = self.migrate_one(category).await;
            self.states.insert(category.entity_id, state);
        }
        self.states
    }

    async fn migrate_one(&self, category: &SourceCategory) -> CategoryState {
        let ctx = self.ctx;
        let key = category.entity_id.to_string();

        if category.level == 0 {
            ctx.reporter
                .skipped(ResourceKind::Categories, &key, "virtual root");
            return CategoryState::Resolved(None);
        }

        let parent = match self.parent_target(category) {
            Ok(parent) => parent,
            Err(err) => {
                ctx.reporter.failed(ResourceKind::Categories, &key, &err);
                return CategoryState::Failed;
            }
        };

        let handle = match self.choose_handle(category, parent.as_deref()).await {
            Ok(handle) => handle,
            Err(err) => {
                ctx.reporter.failed(ResourceKind::Categories, &key, &err);
                return CategoryState::Failed;
            }
        };
        let payload = payload(category, &handle, parent);

        match self.upsert(&handle, &payload).await {
            Ok(Upserted::Created(created)) => {
                ctx.reporter
                    .created(ResourceKind::Categories, &handle, &created.id);
                self.resolved(category, created)
            }
            Ok(Upserted::Existing(existing)) => {
                ctx.reporter
                    .skipped(ResourceKind::Categories, &handle, "already exists");
                self.resolved(category, existing)
            }
            Err(err) => {
                // The create may have landed before failing; look once more
                // so the subtree is not orphaned.
                match self.find(&handle).await {
                    Ok(Some(existing)) => {
                        ctx.reporter.skipped(
                            ResourceKind::Categories,
                            &handle,
                            "found after failed create",
                        );
                        self.resolved(category, existing)
                    }
                    _ => {
                        ctx.reporter.failed(ResourceKind::Categories, &handle, &err);
                        CategoryState::Failed
                    }
                }
            }
        }
    }

    fn resolved(&self, category: &SourceCategory, target: TargetCategory) -> CategoryState {
        self.ctx
            .mappings
            .insert(ResourceKind::Categories, category.entity_id, &target.id);
        CategoryState::Resolved(Some(target.id))
    }

    /// Target id of the parent, `None` for top-level categories.
    fn parent_target(&self, category: &SourceCategory) -> Result<Option<String>, AppError> {
        let Some(parent_id) = category.parent_id else {
            return Ok(None);
        };
        match self.states.get(&parent_id) {
            Some(CategoryState::Resolved(id)) => Ok(id.clone()),
            Some(CategoryState::Failed) => Err(AppError::Validation(format!(
                "parent category {} failed to migrate",
                parent_id
            ))),
            Some(CategoryState::Pending) => Err(AppError::Internal(format!(
                "parent category {} visited after its child",
                parent_id
            ))),
            // Not part of this snapshot; a previous run may know it.
            None => Ok(self
                .ctx
                .mappings
                .get(ResourceKind::Categories, parent_id)),
        }
    }

    /// The category's handle, disambiguated when a same-named category
    /// already exists under another parent.
    async fn choose_handle(
        &self,
        category: &SourceCategory,
        parent: Option<&str>,
    ) -> Result<String, AppError> {
        let handle = make_handle(
            "category",
            &[
                category.url_key.as_deref().unwrap_or(""),
                category.name.as_str(),
            ],
            category.entity_id,
        );
        match self.find(&handle).await? {
            Some(existing) if existing.parent_category_id.as_deref() != parent => {
                let scoped = format!("{}-{}", handle, category.entity_id);
                tracing::debug!(handle, scoped, "handle taken under another parent");
                Ok(scoped)
            }
            _ => Ok(handle),
        }
    }

    async fn find(&self, handle: &str) -> Result<Option<TargetCategory>, AppError> {
        let backend = &self.ctx.backend;
        self.ctx
            .resolver
            .resolve(&format!("category:{}", handle), || {
                backend.find_category_by_handle(handle)
            })
            .await
    }

    async fn upsert(
        &self,
        handle: &str,
        payload: &NewCategory,
    ) -> Result<Upserted<TargetCategory>, AppError> {
        let backend = &self.ctx.backend;
        self.ctx
            .resolver
            .upsert(
                &format!("category:{}", handle),
                || backend.find_category_by_handle(handle),
                || async {
                    backend
                        .create_categories(vec![payload.clone()])
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| {
                            AppError::Internal(format!(
                                "backend returned no category for {}",
                                handle
                            ))
                        })
                },
            )
            .await
    }
}

/// Sorts by `(level, position, source id)` so parents precede children.
pub fn tree_order(mut categories: Vec<SourceCategory>) -> Vec<SourceCategory> {
    categories.sort_by_key(|c| (c.level, c.position, c.entity_id));
    categories
}

fn payload(category: &SourceCategory, handle: &str, parent: Option<String>) -> NewCategory {
    NewCategory {
        name: category.name.clone(),
        handle: handle.to_string(),
        parent_category_id: parent,
        is_active: category.is_active.unwrap_or(true),
        rank: category.position,
        description: category.description.clone(),
        metadata: json!({
            "source_id": category.entity_id,
            "source_parent_id": category.parent_id,
        }),
    }
}
