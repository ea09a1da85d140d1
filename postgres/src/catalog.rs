//! Read-only resource catalog backed by `PostgreSQL`.

use crate::rows::{self, backend};
use async_trait::async_trait;
use fieldbook_core::environment::ResourceCatalog;
use fieldbook_core::store::StoreError;
use fieldbook_core::types::{PricingRule, Resource, ResourceId, ResourceType, ResourceTypeId};
use sqlx::postgres::PgPool;

/// Catalog reads over the `resources`, `resource_types` and `pricing_rules` tables
#[derive(Clone, Debug)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceCatalog for PostgresCatalog {
    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        sqlx::query(
            r"
            SELECT id, resource_type_id, name, open_time, close_time, status
            FROM resources
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .as_ref()
        .map(rows::resource)
        .transpose()
    }

    async fn resource_type(&self, id: ResourceTypeId) -> Result<Option<ResourceType>, StoreError> {
        sqlx::query("SELECT id, name, base_price_per_hour FROM resource_types WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(rows::resource_type)
            .transpose()
    }

    async fn pricing_rules(&self, id: ResourceTypeId) -> Result<Vec<PricingRule>, StoreError> {
        sqlx::query(
            r"
            SELECT id, resource_type_id, day_of_week, start_time, end_time, price_per_hour,
                   peak, peak_multiplier_bp, effective_from, effective_to
            FROM pricing_rules
            WHERE resource_type_id = $1
            ORDER BY day_of_week, start_time
            ",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .iter()
        .map(rows::pricing_rule)
        .collect()
    }
}
