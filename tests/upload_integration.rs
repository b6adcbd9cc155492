//! Integration tests for the upload pipeline
//!
//! These tests validate the complete store-to-controllers workflow:
//! - Clearing pending steps before writing
//! - Namespace requalification per controller
//! - Field failures failing only their unit
//! - Recipe name and active recipe bookkeeping

mod common;

use common::builders::PlantBuilder;
use common::mock_helpers::{create_test_reference, create_test_satellite};
use common::{fast_config, path, step_field};
use recipe_sync::{DeclaredType, DeviceValue, StoreValue};

const RECIPE: i64 = 5;
const STRUCTURE: i64 = 1;
const CLEAR: &str = r#""Recipe_Handler"."External"."ClearRunningSteps""#;
const NAME: &str = r#""StepData"."RunningSteps"."Name""#;
const MASTER_TAG: &str = r#""Recipe"."Number""#;

fn with_oven_rows(builder: PlantBuilder, unit_id: u16) -> PlantBuilder {
    builder
        .stored(
            RECIPE,
            unit_id,
            &step_field(1, "Speed").to_string(),
            StoreValue::text("15.5"),
            DeclaredType::Float,
        )
        .stored(
            RECIPE,
            unit_id,
            &step_field(1, "Enabled").to_string(),
            StoreValue::text("false"),
            DeclaredType::Boolean,
        )
        .stored(
            RECIPE,
            unit_id,
            &step_field(2, "Duration").to_string(),
            StoreValue::text("300"),
            DeclaredType::UInt32,
        )
}

#[tokio::test]
async fn test_upload_writes_every_row() {
    let builder = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", create_test_satellite(2))
        .array_unit(2, "Cooler", create_test_satellite(2));
    let plant = with_oven_rows(with_oven_rows(builder, 1), 2).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(report.succeeded(), "{}", report);
    for unit in [1, 2] {
        let controller = plant.controller(unit);
        assert_eq!(controller.writes_to(&path(CLEAR)), vec![DeviceValue::Boolean(true)]);
        assert_eq!(
            controller.value(&step_field(1, "Speed")),
            Some(DeviceValue::Float(15.5))
        );
        assert_eq!(
            controller.value(&step_field(1, "Enabled")),
            Some(DeviceValue::Boolean(false))
        );
        assert_eq!(
            controller.value(&step_field(2, "Duration")),
            Some(DeviceValue::UInt32(300))
        );
    }
    let oven = report.unit(1).unwrap();
    assert_eq!(oven.steps(), Some(2));
}

#[tokio::test]
async fn test_unconfirmed_clear_skips_unit_writes() {
    let stuck = create_test_satellite(2).hang_on_write(&path(CLEAR));
    let builder = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", stuck)
        .array_unit(2, "Cooler", create_test_satellite(2));
    let plant = with_oven_rows(with_oven_rows(builder, 1), 2).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(!report.succeeded());
    let oven = report.unit(1).unwrap();
    assert!(!oven.is_success());
    assert!(oven.to_string().contains("clear not confirmed"), "{}", oven);
    assert!(plant.controller(1).writes().is_empty());
    assert!(plant.controller(1).disconnects() >= 1);

    // the next unit is still uploaded
    assert!(report.unit(2).unwrap().is_success());
    assert_eq!(
        plant.controller(2).value(&step_field(1, "Speed")),
        Some(DeviceValue::Float(15.5))
    );
}

#[tokio::test]
async fn test_upload_requalifies_namespace() {
    let satellite = create_test_satellite(2).with_namespace_index(6);
    let plant = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", satellite)
        .stored(
            RECIPE,
            1,
            &step_field(1, "Speed").to_string(),
            StoreValue::text("11"),
            DeclaredType::Float,
        )
        .stored(
            RECIPE,
            1,
            &format!("ns=3;s={}", step_field(2, "Speed")),
            StoreValue::text("13"),
            DeclaredType::Float,
        )
        .build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(report.succeeded(), "{}", report);
    let writes = plant.controller(1).writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|(address, _)| address.namespace() == 6));
    assert_eq!(
        plant.controller(1).value(&step_field(2, "Speed")),
        Some(DeviceValue::Float(13.0))
    );
}

#[tokio::test]
async fn test_field_failure_fails_unit_after_remaining_writes() {
    let flaky = create_test_satellite(2).fail_write(&step_field(1, "Enabled"));
    let builder = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", flaky)
        .array_unit(2, "Cooler", create_test_satellite(2));
    let plant = with_oven_rows(with_oven_rows(builder, 1), 2).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    let oven = report.unit(1).unwrap();
    assert!(!oven.is_success());
    assert!(oven.to_string().contains("1 of 3 values not written"), "{}", oven);
    assert_eq!(
        plant.controller(1).value(&step_field(2, "Duration")),
        Some(DeviceValue::UInt32(300))
    );
    assert!(report.unit(2).unwrap().is_success());
    assert_eq!(report.failed_units().len(), 1);
}

#[tokio::test]
async fn test_uncoercible_value_is_never_written() {
    let plant = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", create_test_satellite(2))
        .stored(
            RECIPE,
            1,
            &step_field(1, "Speed").to_string(),
            StoreValue::text("abc"),
            DeclaredType::Float,
        )
        .stored(
            RECIPE,
            1,
            &step_field(2, "Speed").to_string(),
            StoreValue::text("20"),
            DeclaredType::Float,
        )
        .build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    let oven = report.unit(1).unwrap();
    assert!(!oven.is_success());
    assert!(oven.to_string().contains("Coercion"), "{}", oven);
    assert!(plant.controller(1).writes_to(&step_field(1, "Speed")).is_empty());
    assert_eq!(
        plant.controller(1).value(&step_field(1, "Speed")),
        Some(DeviceValue::Float(10.0))
    );
    assert_eq!(
        plant.controller(1).writes_to(&step_field(2, "Speed")),
        vec![DeviceValue::Float(20.0)]
    );
}

#[tokio::test]
async fn test_reference_unit_is_written_without_clear() {
    let plant = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", create_test_satellite(1))
        .scalar_unit(
            3,
            "Master",
            MASTER_TAG,
            create_test_reference(MASTER_TAG, DeviceValue::Int32(1)),
        )
        .stored(RECIPE, 3, MASTER_TAG, StoreValue::text("17"), DeclaredType::Int32)
        .build();

    let report = plant
        .engine()
        .upload_from_recipe(RECIPE, Some("Cure B"))
        .await
        .unwrap();

    assert!(report.succeeded(), "{}", report);
    let master = plant.controller(3);
    assert_eq!(master.writes().len(), 1);
    assert_eq!(master.value(&path(MASTER_TAG)), Some(DeviceValue::Int32(17)));
    assert_eq!(master.connects(), 1);

    // unit 1 has no rows: cleared, nothing else written
    let oven = plant.controller(1);
    assert_eq!(oven.writes().len(), 1);
    assert_eq!(oven.writes_to(&path(CLEAR)), vec![DeviceValue::Boolean(true)]);
    assert_eq!(report.unit(1).unwrap().steps(), Some(0));
}

#[tokio::test]
async fn test_satellite_without_rows_is_still_cleared() {
    let builder = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", create_test_satellite(2))
        .array_unit(2, "Cooler", create_test_satellite(2));
    let plant = with_oven_rows(builder, 1).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(report.succeeded(), "{}", report);
    let cooler = plant.controller(2);
    assert_eq!(cooler.writes_to(&path(CLEAR)), vec![DeviceValue::Boolean(true)]);
    assert_eq!(cooler.writes().len(), 1);
    // stale steps are not overwritten, only released by the clear
    assert_eq!(
        cooler.value(&step_field(1, "Speed")),
        Some(DeviceValue::Float(10.0))
    );
    assert_eq!(report.unit(2).unwrap().steps(), Some(0));
}

#[tokio::test]
async fn test_unconfirmed_clear_fails_unit_without_rows() {
    let stuck = create_test_satellite(1).hang_on_write(&path(CLEAR));
    let builder = PlantBuilder::new(STRUCTURE)
        .array_unit(1, "Oven", create_test_satellite(2))
        .array_unit(2, "Cooler", stuck);
    let plant = with_oven_rows(builder, 1).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(!report.succeeded());
    let cooler = report.unit(2).unwrap();
    assert!(!cooler.is_success());
    assert!(cooler.to_string().contains("clear not confirmed"), "{}", cooler);
    assert!(report.unit(1).unwrap().is_success());
}

#[tokio::test]
async fn test_recipe_name_written_to_satellites() {
    let builder = PlantBuilder::new(STRUCTURE).array_unit(1, "Oven", create_test_satellite(2));
    let plant = with_oven_rows(builder, 1).build();

    let report = plant
        .engine()
        .upload_from_recipe(RECIPE, Some("Cure B"))
        .await
        .unwrap();

    assert!(report.succeeded(), "{}", report);
    assert_eq!(report.recipe_name.as_deref(), Some("Cure B"));
    assert_eq!(
        plant.controller(1).value(&path(NAME)),
        Some(DeviceValue::String("Cure B".to_string()))
    );
    assert_eq!(plant.store.active_recipe().as_deref(), Some("Cure B"));
}

#[tokio::test]
async fn test_recipe_name_write_can_be_disabled() {
    let builder = PlantBuilder::new(STRUCTURE).array_unit(1, "Oven", create_test_satellite(2));
    let plant = with_oven_rows(builder, 1).build();
    let mut config = fast_config();
    config.upload.write_recipe_name = false;

    plant
        .engine_with(config)
        .upload_from_recipe(RECIPE, Some("Cure B"))
        .await
        .unwrap();

    assert!(plant.controller(1).writes_to(&path(NAME)).is_empty());
    assert_eq!(plant.store.active_recipe().as_deref(), Some("Cure B"));
}

#[tokio::test]
async fn test_unreachable_unit_fails_upload() {
    let builder = PlantBuilder::new(STRUCTURE)
        .offline_unit(1, "Oven")
        .array_unit(2, "Cooler", create_test_satellite(2));
    let plant = with_oven_rows(with_oven_rows(builder, 1), 2).build();

    let report = plant.engine().upload_from_recipe(RECIPE, None).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.failed_units()[0].unit_name, "Oven");
    assert!(report.unit(2).unwrap().is_success());
}
