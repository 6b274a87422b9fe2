// src/config/mod.rs

pub mod assemble;
pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use assemble::{build_pipeline, build_registry, build_trigger_service, TriggerSpec};
pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, JobConfig, RawConfigFile, ScheduleConfig, UnitConfig};
