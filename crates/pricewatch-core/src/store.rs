use crate::plan::ExtractedPlan;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Document-store collaborator for extracted plans. Plan records are
/// write-once per extraction run: a save replaces everything the owner had,
/// it never updates records field-by-field.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create_many(&self, owner_id: &str, plans: &[ExtractedPlan]) -> anyhow::Result<u64>;

    async fn delete_by_owner(&self, owner_id: &str) -> anyhow::Result<u64>;

    async fn find_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<ExtractedPlan>>;

    /// Replace-on-save: delete then insert, atomic from the caller's
    /// perspective where the backend supports it.
    async fn replace_for_owner(
        &self,
        owner_id: &str,
        plans: &[ExtractedPlan],
    ) -> anyhow::Result<u64> {
        self.delete_by_owner(owner_id).await?;
        self.create_many(owner_id, plans).await
    }
}

/// Save an extraction run's plans for an owner, returning the stored count.
pub async fn save_plans(
    store: &dyn PlanStore,
    owner_id: &str,
    plans: &[ExtractedPlan],
) -> anyhow::Result<u64> {
    store.replace_for_owner(owner_id, plans).await
}

pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_many(&self, owner_id: &str, plans: &[ExtractedPlan]) -> anyhow::Result<u64> {
        let mut count = 0u64;
        for plan in plans {
            sqlx::query(
                r#"
                INSERT INTO pricing_plans (id, owner_id, name, billing_period, data, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(uuid::Uuid::now_v7())
            .bind(owner_id)
            .bind(&plan.name)
            .bind(plan.billing_period.as_str())
            .bind(serde_json::to_value(plan)?)
            .execute(&self.pool)
            .await?;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_by_owner(&self, owner_id: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM pricing_plans WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<ExtractedPlan>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM pricing_plans
            WHERE owner_id = $1
            ORDER BY name ASC, billing_period ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let plans = rows
            .into_iter()
            .map(|row| {
                let value: serde_json::Value = row.get("data");
                serde_json::from_value(value)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(plans)
    }

    async fn replace_for_owner(
        &self,
        owner_id: &str,
        plans: &[ExtractedPlan],
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pricing_plans WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        let mut count = 0u64;
        for plan in plans {
            sqlx::query(
                r#"
                INSERT INTO pricing_plans (id, owner_id, name, billing_period, data, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(uuid::Uuid::now_v7())
            .bind(owner_id)
            .bind(&plan.name)
            .bind(plan.billing_period.as_str())
            .bind(serde_json::to_value(plan)?)
            .execute(&mut *tx)
            .await?;
            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BillingPeriod;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<String, Vec<ExtractedPlan>>>,
    }

    #[async_trait]
    impl PlanStore for MemoryStore {
        async fn create_many(&self, owner_id: &str, plans: &[ExtractedPlan]) -> anyhow::Result<u64> {
            let mut records = self.records.lock().unwrap();
            records
                .entry(owner_id.to_string())
                .or_default()
                .extend_from_slice(plans);
            Ok(plans.len() as u64)
        }

        async fn delete_by_owner(&self, owner_id: &str) -> anyhow::Result<u64> {
            let mut records = self.records.lock().unwrap();
            Ok(records.remove(owner_id).map_or(0, |v| v.len() as u64))
        }

        async fn find_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<ExtractedPlan>> {
            let records = self.records.lock().unwrap();
            Ok(records.get(owner_id).cloned().unwrap_or_default())
        }
    }

    fn plan(name: &str) -> ExtractedPlan {
        ExtractedPlan {
            name: name.into(),
            billing_period: BillingPeriod::Monthly,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_replaces_previous_records() {
        let store = MemoryStore::default();

        let count = save_plans(&store, "owner-1", &[plan("Basic"), plan("Pro")]).await.unwrap();
        assert_eq!(count, 2);

        let count = save_plans(&store, "owner-1", &[plan("Team")]).await.unwrap();
        assert_eq!(count, 1);

        let found = store.find_by_owner("owner-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Team");
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let store = MemoryStore::default();
        save_plans(&store, "a", &[plan("Basic")]).await.unwrap();
        save_plans(&store, "b", &[plan("Pro")]).await.unwrap();

        assert_eq!(store.find_by_owner("a").await.unwrap()[0].name, "Basic");
        assert_eq!(store.find_by_owner("b").await.unwrap()[0].name, "Pro");
    }
}
