use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::compute::{Breakdown, FactorVersions, LcaMetrics};

/// The stored computation for a product. There is at most one per product, each new
/// computation overwrites the previous one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationResult {
    pub id: Uuid,
    pub product_id: String,
    pub co2_kg: f64,
    pub water_l: f64,
    pub energy_mj: f64,
    pub breakdown: Breakdown,
    pub factors_versions: FactorVersions,
    pub artifact_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: Uuid,
    product_id: String,
    co2_kg: f64,
    water_l: f64,
    energy_mj: f64,
    breakdown: Json<Breakdown>,
    factors_versions: Json<FactorVersions>,
    artifact_uri: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ResultRow> for ComputationResult {
    fn from(row: ResultRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            co2_kg: row.co2_kg,
            water_l: row.water_l,
            energy_mj: row.energy_mj,
            breakdown: row.breakdown.0,
            factors_versions: row.factors_versions.0,
            artifact_uri: row.artifact_uri,
            created_at: row.created_at,
        }
    }
}

/// Write `metrics` as the product's result. The first write inserts the row, later ones
/// overwrite it in place and keep its id and creation time. Concurrent writers for the
/// same product serialize on the row, and the last one to commit wins.
pub async fn upsert_latest<'c, E>(
    executor: E,
    product_id: &str,
    metrics: &LcaMetrics,
    artifact_uri: Option<&str>,
) -> Result<ComputationResult, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row = sqlx::query_as::<_, ResultRow>(
        r#"
            INSERT INTO lca_result
                (id, product_id, co2_kg, water_l, energy_mj, breakdown, factors_versions,
                 artifact_uri, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (product_id) DO UPDATE SET
                co2_kg = EXCLUDED.co2_kg,
                water_l = EXCLUDED.water_l,
                energy_mj = EXCLUDED.energy_mj,
                breakdown = EXCLUDED.breakdown,
                factors_versions = EXCLUDED.factors_versions,
                artifact_uri = EXCLUDED.artifact_uri
            RETURNING id, product_id, co2_kg, water_l, energy_mj, breakdown,
                      factors_versions, artifact_uri, created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(product_id)
    .bind(metrics.co2_kg)
    .bind(metrics.water_l)
    .bind(metrics.energy_mj)
    .bind(Json(&metrics.breakdown))
    .bind(Json(&metrics.versions))
    .bind(artifact_uri)
    .fetch_one(executor)
    .await?;

    Ok(row.into())
}

pub async fn latest_for_product<'c, E>(
    executor: E,
    product_id: &str,
) -> Result<Option<ComputationResult>, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row = sqlx::query_as::<_, ResultRow>(
        r#"
            SELECT id, product_id, co2_kg, water_l, energy_mj, breakdown, factors_versions,
                   artifact_uri, created_at
            FROM lca_result
            WHERE product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}
