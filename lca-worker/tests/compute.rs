use chrono::{TimeZone, Utc};
use lca_worker::{
    compute::{compute, round4},
    event::NormalizedEvent,
    factors::{resolve_factors, EmissionFactor, FactorKind, StaticFactors},
};

fn factor(class: &str, co2: f64, water: f64, energy: f64) -> EmissionFactor {
    EmissionFactor {
        class: class.to_string(),
        version: "2024-01".to_string(),
        co2,
        water,
        energy,
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn factors() -> StaticFactors {
    StaticFactors::new()
        .with_factor(FactorKind::Ingredient, factor("DAIRY", 9.2, 1000.0, 15.0))
        .with_factor(FactorKind::Ingredient, factor("SWEETENER", 3.5, 600.0, 5.0))
        .with_factor(FactorKind::Ingredient, factor("OTHER", 1.0, 200.0, 4.0))
        .with_factor(FactorKind::Packaging, factor("GLASS", 1.8, 150.0, 6.0))
        .with_factor(FactorKind::Packaging, factor("OTHER", 2.0, 120.0, 5.0))
        .with_factor(FactorKind::Transport, factor("TRUCK", 0.1, 0.0, 0.05))
}

#[tokio::test]
async fn yoghurt_jar_end_to_end() {
    let event = NormalizedEvent::from_slice(
        br#"{
            "eventId": "evt-42",
            "productId": "yoghurt-500",
            "ingredients": [
                {"name": "milk", "category": "dairy", "quantity_g": 450},
                {"name": "sugar", "category": "SWEETENER", "quantity_g": 40},
                {"name": "vanilla", "quantity_g": 10}
            ],
            "packaging": {"material": "GLASS", "weight_g": 200},
            "transport": {"distance_km": 300, "weight_g": 700}
        }"#,
    )
    .unwrap();

    let resolved = resolve_factors(&factors(), &event).await.unwrap();
    let metrics = compute(&event, &resolved);

    // 0.45 * 9.2 + 0.04 * 3.5 + 0.01 * 1.0
    assert_eq!(metrics.breakdown.ingredients.co2_kg, 4.29);
    // 0.2 * 1.8
    assert_eq!(metrics.breakdown.packaging.co2_kg, 0.36);
    // 0.0007 t over 300 km is 0.21 tkm
    assert_eq!(metrics.breakdown.transport.co2_kg, 0.021);
    assert_eq!(metrics.co2_kg, 4.671);

    let b = metrics.breakdown;
    assert_eq!(
        metrics.water_l,
        round4(b.ingredients.water_l + b.packaging.water_l + b.transport.water_l)
    );
    assert_eq!(metrics.versions.ingredient_factors_version, "2024-01");
    assert_eq!(metrics.versions.packaging_version, "2024-01");
    assert_eq!(metrics.versions.transport_version, "2024-01");
}

#[tokio::test]
async fn unknown_classes_use_defaults_and_missing_defaults_count_as_zero() {
    let event = NormalizedEvent::from_slice(
        br#"{"productId": "mystery",
             "ingredients": [{"name": "x", "category": "UNOBTAINIUM", "quantity_g": 1000}],
             "packaging": {"material": "STYROFOAM", "weight_g": 1000}}"#,
    )
    .unwrap();

    let metrics = compute(&event, &resolve_factors(&factors(), &event).await.unwrap());
    assert_eq!(metrics.breakdown.ingredients.co2_kg, 1.0);
    assert_eq!(metrics.breakdown.packaging.co2_kg, 2.0);

    let only_dairy = StaticFactors::new().with_factor(
        FactorKind::Ingredient,
        factor("DAIRY", 9.2, 1000.0, 15.0),
    );
    let metrics = compute(&event, &resolve_factors(&only_dairy, &event).await.unwrap());
    assert_eq!(metrics.co2_kg, 0.0);
    assert_eq!(metrics.versions.ingredient_factors_version, "v1");
    assert_eq!(metrics.versions.packaging_version, "v1");
}
