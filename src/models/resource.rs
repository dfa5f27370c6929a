//! Resource kinds migrated by the engine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A migrated resource type.
///
/// Declaration order is the run order: categories must exist before
/// products reference them, customers are independent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Categories,
    Products,
    Customers,
}

impl ResourceKind {
    /// All resources in run order.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Categories,
        ResourceKind::Products,
        ResourceKind::Customers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Categories => "categories",
            ResourceKind::Products => "products",
            ResourceKind::Customers => "customers",
        }
    }

    /// Singular noun used in synthetic ids and log lines.
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Categories => "category",
            ResourceKind::Products => "product",
            ResourceKind::Customers => "customer",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "categories" | "category" => Ok(ResourceKind::Categories),
            "products" | "product" => Ok(ResourceKind::Products),
            "customers" | "customer" => Ok(ResourceKind::Customers),
            other => Err(format!("unknown resource: {}", other)),
        }
    }
}
