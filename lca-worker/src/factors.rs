use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::{
    error::ProcessingError,
    event::{
        NormalizedEvent, DEFAULT_INGREDIENT_CATEGORY, DEFAULT_PACKAGING_MATERIAL,
        DEFAULT_TRANSPORT_MODE,
    },
    metric_consts::MISSING_FACTOR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    Ingredient,
    Packaging,
    Transport,
}

impl FactorKind {
    /// The class every lookup of this kind falls back to.
    pub fn default_class(&self) -> &'static str {
        match self {
            FactorKind::Ingredient => DEFAULT_INGREDIENT_CATEGORY,
            FactorKind::Packaging => DEFAULT_PACKAGING_MATERIAL,
            FactorKind::Transport => DEFAULT_TRANSPORT_MODE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FactorKind::Ingredient => "ingredient",
            FactorKind::Packaging => "packaging",
            FactorKind::Transport => "transport",
        }
    }

    // Ingredient and packaging coefficients are per kilogram, transport ones per tonne-kilometre.
    fn lookup_query(&self) -> &'static str {
        match self {
            FactorKind::Ingredient => {
                r#"
                SELECT category AS class, version, co2_kg_per_kg AS co2, water_l_per_kg AS water,
                       energy_mj_per_kg AS energy, updated_at
                FROM lca_ingredient_factors
                WHERE category = $1
                ORDER BY updated_at DESC
                LIMIT 1
                "#
            }
            FactorKind::Packaging => {
                r#"
                SELECT material AS class, version, co2_kg_per_kg AS co2, water_l_per_kg AS water,
                       energy_mj_per_kg AS energy, updated_at
                FROM lca_packaging_factors
                WHERE material = $1
                ORDER BY updated_at DESC
                LIMIT 1
                "#
            }
            FactorKind::Transport => {
                r#"
                SELECT mode AS class, version, co2_kg_per_tkm AS co2, water_l_per_tkm AS water,
                       energy_mj_per_tkm AS energy, updated_at
                FROM lca_transport_factors
                WHERE mode = $1
                ORDER BY updated_at DESC
                LIMIT 1
                "#
            }
        }
    }
}

/// One version of the reference coefficients for a class.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EmissionFactor {
    pub class: String,
    pub version: String,
    pub co2: f64,
    pub water: f64,
    pub energy: f64,
    pub updated_at: DateTime<Utc>,
}

/// Upper-case and trim a class label, using the kind's default when nothing is left.
pub fn normalize_class(kind: FactorKind, class: &str) -> String {
    let class = class.trim();
    if class.is_empty() {
        kind.default_class().to_string()
    } else {
        class.to_uppercase()
    }
}

#[async_trait]
pub trait FactorRepository: Send + Sync {
    /// The most recently updated factor for exactly this class, if any.
    async fn find_latest(
        &self,
        kind: FactorKind,
        class: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError>;

    /// Exact class first, then the kind's default class. `None` means neither exists,
    /// and callers count the line with zero coefficients.
    async fn resolve(
        &self,
        kind: FactorKind,
        class: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        let class = normalize_class(kind, class);
        if let Some(factor) = self.find_latest(kind, &class).await? {
            return Ok(Some(factor));
        }

        let default_class = kind.default_class();
        if class == default_class {
            return Ok(None);
        }
        self.find_latest(kind, default_class).await
    }

    async fn ingredient_factor(
        &self,
        category: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        self.resolve(FactorKind::Ingredient, category).await
    }

    async fn packaging_factor(
        &self,
        material: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        self.resolve(FactorKind::Packaging, material).await
    }

    async fn transport_factor(
        &self,
        mode: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        self.resolve(FactorKind::Transport, mode).await
    }
}

pub struct PgFactorRepository {
    pool: PgPool,
}

impl PgFactorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactorRepository for PgFactorRepository {
    async fn find_latest(
        &self,
        kind: FactorKind,
        class: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        Ok(sqlx::query_as::<_, EmissionFactor>(kind.lookup_query())
            .bind(class)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// In-memory factor table, for tests and local runs without reference data in postgres.
#[derive(Debug, Clone, Default)]
pub struct StaticFactors {
    factors: HashMap<(FactorKind, String), Vec<EmissionFactor>>,
}

impl StaticFactors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factor(mut self, kind: FactorKind, factor: EmissionFactor) -> Self {
        let class = normalize_class(kind, &factor.class);
        self.factors.entry((kind, class)).or_default().push(factor);
        self
    }
}

#[async_trait]
impl FactorRepository for StaticFactors {
    async fn find_latest(
        &self,
        kind: FactorKind,
        class: &str,
    ) -> Result<Option<EmissionFactor>, ProcessingError> {
        Ok(self
            .factors
            .get(&(kind, class.to_string()))
            .and_then(|versions| versions.iter().max_by_key(|f| f.updated_at))
            .cloned())
    }
}

/// The factor chosen for every part of one event, in event order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFactors {
    pub ingredients: Vec<Option<EmissionFactor>>,
    pub packaging: Option<EmissionFactor>,
    pub transport: Option<EmissionFactor>,
}

pub async fn resolve_factors<R>(
    repository: &R,
    event: &NormalizedEvent,
) -> Result<ResolvedFactors, ProcessingError>
where
    R: FactorRepository + ?Sized,
{
    let mut resolved = ResolvedFactors {
        ingredients: Vec::with_capacity(event.ingredients.len()),
        ..Default::default()
    };

    for line in &event.ingredients {
        let factor = repository.ingredient_factor(&line.category).await?;
        if factor.is_none() {
            report_missing(FactorKind::Ingredient, &line.category, &event.product_id);
        }
        resolved.ingredients.push(factor);
    }

    if let Some(packaging) = &event.packaging {
        resolved.packaging = repository.packaging_factor(&packaging.material).await?;
        if resolved.packaging.is_none() {
            report_missing(FactorKind::Packaging, &packaging.material, &event.product_id);
        }
    }

    if let Some(transport) = &event.transport {
        resolved.transport = repository.transport_factor(&transport.mode).await?;
        if resolved.transport.is_none() {
            report_missing(FactorKind::Transport, &transport.mode, &event.product_id);
        }
    }

    Ok(resolved)
}

// No factor, not even the default class: the line is counted as zero impact.
fn report_missing(kind: FactorKind, class: &str, product_id: &str) {
    metrics::counter!(MISSING_FACTOR, "kind" => kind.as_str()).increment(1);
    warn!(
        kind = kind.as_str(),
        class, product_id, "No emission factor or default found, counting as zero"
    );
}
