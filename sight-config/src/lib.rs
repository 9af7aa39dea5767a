//! XML application-configuration parsing, `${name}` parameter substitution,
//! the configuration engine that turns a configuration tree into a live
//! object/service/connection graph, and activity orchestration on top of it.

pub mod activity;
pub mod engine;
pub mod substitute;
pub mod xml;

pub use activity::{ActivityDescriptor, ActivityLauncher, ActivityParameter, ActivityRegistry, ActivityValidator, ObjectValidator, RequiredInput, ValidationOutcome, ValidatorRegistry};
pub use engine::{ConfigurationEngine, LaunchedConfiguration};
pub use substitute::Parameters;
