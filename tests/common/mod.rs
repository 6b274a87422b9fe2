#![allow(dead_code)]

use std::sync::Arc;

use pipedag::dag::{UnitAction, UnitRegistry};
use pipedag::types::Group;

pub use pipedag_test_utils::actions;
pub use pipedag_test_utils::init_tracing;

/// The medical pipeline shape with caller-chosen actions:
///
/// telegram_scraper -> data_loader -> dbt_transform -> load_detections
/// telegram_scraper -> yolo_enrichment -> load_detections
pub fn medical_registry(action: impl Fn(&str) -> Arc<dyn UnitAction>) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    let units = [
        ("telegram_scraper", Group::Extract, vec![]),
        ("data_loader", Group::Load, vec!["telegram_scraper"]),
        ("dbt_transform", Group::Transform, vec!["data_loader"]),
        ("yolo_enrichment", Group::Enrich, vec!["telegram_scraper"]),
        (
            "load_detections",
            Group::Enrich,
            vec!["yolo_enrichment", "dbt_transform"],
        ),
    ];

    for (name, group, after) in units {
        registry
            .register(actions::unit(name, group, &after, action(name)))
            .expect("medical pipeline registers cleanly");
    }
    registry
}

/// Diamond A -> {B, C} -> D.
pub fn diamond_registry(action: impl Fn(&str) -> Arc<dyn UnitAction>) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    let units = [
        ("A", Group::Extract, vec![]),
        ("B", Group::Load, vec!["A"]),
        ("C", Group::Load, vec!["A"]),
        ("D", Group::Transform, vec!["B", "C"]),
    ];

    for (name, group, after) in units {
        registry
            .register(actions::unit(name, group, &after, action(name)))
            .expect("diamond registers cleanly");
    }
    registry
}
