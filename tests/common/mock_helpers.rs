//! Mock construction helpers

use super::{namespace_uri, path, STEPS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use recipe_sync::controller::mock::{MockController, MockStep};
use recipe_sync::types::{RecipeStructureMapping, UnitEndpoint};
use recipe_sync::{DeviceValue, RecipeId, RecipeStore, Result, TagValue};

mock! {
    pub Store {}

    #[async_trait]
    impl RecipeStore for Store {
        async fn recipe_structure_map(&self) -> Result<Vec<RecipeStructureMapping>>;
        async fn units(&self) -> Result<Vec<UnitEndpoint>>;
        async fn upsert_tag_values(&self, rows: &[TagValue]) -> Result<()>;
        async fn tag_values(&self, recipe_id: RecipeId) -> Result<Vec<TagValue>>;
        async fn mark_recipe_synchronized(&self, recipe_id: RecipeId, at: DateTime<Utc>) -> Result<()>;
        async fn set_active_recipe(&self, name: &str) -> Result<()>;
    }
}

/// A controller registering the configured namespace at the default index
pub fn create_test_controller() -> MockController {
    MockController::new(namespace_uri())
}

/// One step of an oven program
pub fn oven_step(speed: f32, enabled: bool, duration: u32) -> MockStep {
    vec![
        ("Speed".to_string(), DeviceValue::Float(speed)),
        ("Enabled".to_string(), DeviceValue::Boolean(enabled)),
        ("Duration".to_string(), DeviceValue::UInt32(duration)),
    ]
}

/// A controller holding `count` oven steps at the configured step array
pub fn create_test_satellite(count: usize) -> MockController {
    let steps = (0..count)
        .map(|i| oven_step(10.0 + i as f32 * 2.5, i % 2 == 0, 60 * (i as u32 + 1)))
        .collect();
    with_controls(create_test_controller().with_step_array(&path(STEPS), steps))
}

/// Add the clear and recipe name controls of the default configuration
pub fn with_controls(controller: MockController) -> MockController {
    controller
        .with_variable(
            &path(r#""Recipe_Handler"."External"."ClearRunningSteps""#),
            DeviceValue::Boolean(false),
        )
        .with_variable(
            &path(r#""StepData"."RunningSteps"."Name""#),
            DeviceValue::String(String::new()),
        )
}

/// A reference controller holding one scalar
pub fn create_test_reference(scalar: &str, value: DeviceValue) -> MockController {
    create_test_controller().with_variable(&path(scalar), value)
}
