//! Activity orchestration (spec §4.7), generalizing the two parameter forms
//! `original_source/.../IActivityLauncher.cpp` uses: binding a replacement
//! to a resolved input object's id (`ActivityParameter::Object`), and a
//! plain literal substitution (`ActivityParameter::Literal`).

use std::{collections::HashMap, sync::Arc};

use sight_core::{id::IdRegistry, object::Object, type_registry::TypeRegistry, RuntimeError};

use crate::substitute::Parameters;

#[derive(Debug, Clone)]
pub struct RequiredInput {
    pub key: String,
    pub type_tag: String,
    pub min_occurs: u32,
    pub max_occurs: u32,
    pub create_if_missing: bool,
}

#[derive(Debug, Clone)]
pub enum ActivityParameter {
    /// Substitutes `replace` with the id of the resolved input named `by`.
    Object { replace: String, by: String },
    /// Substitutes `replace` with a fixed literal value.
    Literal { replace: String, value: String },
}

#[derive(Debug, Clone)]
pub struct ActivityDescriptor {
    pub id: String,
    pub required_inputs: Vec<RequiredInput>,
    pub sub_configuration: String,
    pub validator_tags: Vec<String>,
    pub parameters: Vec<ActivityParameter>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub message: String,
}

impl ValidationOutcome {
    pub fn pass() -> Self {
        Self { ok: true, message: String::new() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Checks a single composite of candidate objects (e.g. "do these two
/// images have matching size and spacing").
pub trait ObjectValidator: Send + Sync {
    fn validate(&self, objects: &[Arc<Object>]) -> ValidationOutcome;
}

/// Checks the complete activity binding, including descriptor metadata.
pub trait ActivityValidator: Send + Sync {
    fn validate(&self, descriptor: &ActivityDescriptor, inputs: &HashMap<String, Vec<Arc<Object>>>) -> ValidationOutcome;
}

#[derive(Clone)]
enum Validator {
    Object(Arc<dyn ObjectValidator>),
    Activity(Arc<dyn ActivityValidator>),
}

struct ValidatorEntry {
    owner: Option<String>,
    validator: Validator,
}

#[derive(Default)]
pub struct ValidatorRegistry {
    entries: parking_lot::RwLock<HashMap<String, ValidatorEntry>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_object_validator(&self, tag: impl Into<String>, validator: Arc<dyn ObjectValidator>) {
        self.entries
            .write()
            .insert(tag.into(), ValidatorEntry { owner: None, validator: Validator::Object(validator) });
    }

    pub fn register_object_validator_for_module(
        &self,
        tag: impl Into<String>,
        module_id: impl Into<String>,
        validator: Arc<dyn ObjectValidator>,
    ) {
        self.entries.write().insert(
            tag.into(),
            ValidatorEntry { owner: Some(module_id.into()), validator: Validator::Object(validator) },
        );
    }

    pub fn register_activity_validator(&self, tag: impl Into<String>, validator: Arc<dyn ActivityValidator>) {
        self.entries
            .write()
            .insert(tag.into(), ValidatorEntry { owner: None, validator: Validator::Activity(validator) });
    }

    pub fn register_activity_validator_for_module(
        &self,
        tag: impl Into<String>,
        module_id: impl Into<String>,
        validator: Arc<dyn ActivityValidator>,
    ) {
        self.entries.write().insert(
            tag.into(),
            ValidatorEntry { owner: Some(module_id.into()), validator: Validator::Activity(validator) },
        );
    }

    /// Removes every validator contributed by `module_id`.
    pub fn retract_module(&self, module_id: &str) {
        self.entries.write().retain(|_, entry| entry.owner.as_deref() != Some(module_id));
    }

    fn run(
        &self,
        tag: &str,
        descriptor: &ActivityDescriptor,
        inputs: &HashMap<String, Vec<Arc<Object>>>,
    ) -> Result<ValidationOutcome, RuntimeError> {
        let validator = self
            .entries
            .read()
            .get(tag)
            .map(|e| e.validator.clone())
            .ok_or_else(|| RuntimeError::ConfigurationInvalid(format!("unknown validator tag `{tag}`")))?;
        match validator {
            Validator::Object(v) => {
                let flattened: Vec<Arc<Object>> = inputs.values().flatten().cloned().collect();
                Ok(v.validate(&flattened))
            }
            Validator::Activity(v) => Ok(v.validate(descriptor, inputs)),
        }
    }
}

/// Activity descriptors published by modules, keyed by activity id, so a
/// running application can answer "what activities exist" and launch one by
/// name without the caller having parsed its manifest itself.
struct ActivityEntry {
    owner: Option<String>,
    descriptor: Arc<ActivityDescriptor>,
}

#[derive(Default)]
pub struct ActivityRegistry {
    entries: parking_lot::RwLock<HashMap<String, ActivityEntry>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ActivityDescriptor) {
        self.entries
            .write()
            .insert(descriptor.id.clone(), ActivityEntry { owner: None, descriptor: Arc::new(descriptor) });
    }

    pub fn register_for_module(&self, descriptor: ActivityDescriptor, module_id: impl Into<String>) {
        self.entries.write().insert(
            descriptor.id.clone(),
            ActivityEntry { owner: Some(module_id.into()), descriptor: Arc::new(descriptor) },
        );
    }

    /// Removes every activity descriptor contributed by `module_id`.
    pub fn retract_module(&self, module_id: &str) {
        self.entries.write().retain(|_, entry| entry.owner.as_deref() != Some(module_id));
    }

    pub fn get(&self, id: &str) -> Option<Arc<ActivityDescriptor>> {
        self.entries.read().get(id).map(|e| e.descriptor.clone())
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

pub struct ActivityLauncher<'a> {
    pub ids: &'a IdRegistry,
    pub types: &'a TypeRegistry,
    pub validators: &'a ValidatorRegistry,
}

impl<'a> ActivityLauncher<'a> {
    pub fn new(ids: &'a IdRegistry, types: &'a TypeRegistry, validators: &'a ValidatorRegistry) -> Self {
        Self { ids, types, validators }
    }

    /// Resolves required inputs from `candidates`, validates the binding,
    /// and returns the parameter map to launch `descriptor.sub_configuration`
    /// with. Fails with `cancelled` (spec §7) on unsatisfied requirements or
    /// validator rejection.
    pub fn resolve_and_validate(
        &self,
        descriptor: &ActivityDescriptor,
        candidates: &HashMap<String, Vec<Arc<Object>>>,
    ) -> Result<Parameters, RuntimeError> {
        let mut gathered: HashMap<String, Vec<Arc<Object>>> = HashMap::new();

        for req in &descriptor.required_inputs {
            let pool = candidates.get(&req.key).cloned().unwrap_or_default();
            let mut matched: Vec<Arc<Object>> = pool
                .into_iter()
                .filter(|o| self.types.is_a(o.type_tag(), &req.type_tag))
                .collect();

            if matched.is_empty() && req.create_if_missing {
                let id = self.ids.generate_unique(&req.type_tag);
                let object = self.types.make(&req.type_tag, id.clone())?;
                self.ids.bind(&id, &object);
                matched.push(object);
            }

            if matched.len() < req.min_occurs as usize || matched.len() > req.max_occurs as usize {
                return Err(RuntimeError::Cancelled(format!(
                    "activity `{}`: required input `{}` needs {}..={} matching `{}`, found {}",
                    descriptor.id,
                    req.key,
                    req.min_occurs,
                    req.max_occurs,
                    req.type_tag,
                    matched.len()
                )));
            }
            gathered.insert(req.key.clone(), matched);
        }

        for tag in &descriptor.validator_tags {
            let verdict = self.validators.run(tag, descriptor, &gathered)?;
            if !verdict.ok {
                return Err(RuntimeError::Cancelled(format!(
                    "activity `{}`: validator `{}` rejected binding: {}",
                    descriptor.id, tag, verdict.message
                )));
            }
        }

        let mut params = Parameters::new();
        for req in &descriptor.required_inputs {
            if let Some(first) = gathered.get(&req.key).and_then(|v| v.first()) {
                params.insert(req.key.clone(), first.id().to_string());
            }
        }
        for parameter in &descriptor.parameters {
            match parameter {
                ActivityParameter::Object { replace, by } => {
                    let value = gathered
                        .get(by)
                        .and_then(|v| v.first())
                        .map(|o| o.id().to_string())
                        .ok_or_else(|| {
                            RuntimeError::ConfigurationInvalid(format!(
                                "activity `{}`: parameter `{replace}` references unknown input `{by}`",
                                descriptor.id
                            ))
                        })?;
                    params.insert(replace.clone(), value);
                }
                ActivityParameter::Literal { replace, value } => {
                    params.insert(replace.clone(), value.clone());
                }
            }
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sight_core::Id;

    struct RejectIfEmpty;
    impl ObjectValidator for RejectIfEmpty {
        fn validate(&self, objects: &[Arc<Object>]) -> ValidationOutcome {
            if objects.is_empty() {
                ValidationOutcome::fail("no candidate objects")
            } else {
                ValidationOutcome::pass()
            }
        }
    }

    fn setup() -> (IdRegistry, TypeRegistry) {
        let ids = IdRegistry::new();
        let types = TypeRegistry::new();
        types.register("image", None, Arc::new(|id| Arc::new(Object::new(id, "image", 0i64))), None);
        (ids, types)
    }

    #[test]
    fn launch_fails_when_required_input_missing() {
        let (ids, types) = setup();
        let validators = ValidatorRegistry::new();
        let launcher = ActivityLauncher::new(&ids, &types, &validators);

        let descriptor = ActivityDescriptor {
            id: "act".into(),
            required_inputs: vec![RequiredInput {
                key: "image1".into(),
                type_tag: "image".into(),
                min_occurs: 1,
                max_occurs: 1,
                create_if_missing: false,
            }],
            sub_configuration: "sub".into(),
            validator_tags: vec![],
            parameters: vec![],
        };
        assert!(launcher.resolve_and_validate(&descriptor, &HashMap::new()).is_err());
    }

    #[test]
    fn launch_creates_default_object_when_allowed() {
        let (ids, types) = setup();
        let validators = ValidatorRegistry::new();
        let launcher = ActivityLauncher::new(&ids, &types, &validators);

        let descriptor = ActivityDescriptor {
            id: "act".into(),
            required_inputs: vec![RequiredInput {
                key: "image1".into(),
                type_tag: "image".into(),
                min_occurs: 1,
                max_occurs: 1,
                create_if_missing: true,
            }],
            sub_configuration: "sub".into(),
            validator_tags: vec![],
            parameters: vec![],
        };
        let params = launcher.resolve_and_validate(&descriptor, &HashMap::new()).unwrap();
        assert!(params.contains_key("image1"));
    }

    #[test]
    fn validator_rejection_cancels_launch() {
        let (ids, types) = setup();
        let validators = ValidatorRegistry::new();
        validators.register_object_validator("reject-empty", Arc::new(RejectIfEmpty));
        let launcher = ActivityLauncher::new(&ids, &types, &validators);

        let descriptor = ActivityDescriptor {
            id: "act".into(),
            required_inputs: vec![],
            sub_configuration: "sub".into(),
            validator_tags: vec!["reject-empty".into()],
            parameters: vec![],
        };
        let err = launcher.resolve_and_validate(&descriptor, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled(_)));
    }

    #[test]
    fn object_parameter_form_substitutes_resolved_id() {
        let (ids, types) = setup();
        let validators = ValidatorRegistry::new();
        let launcher = ActivityLauncher::new(&ids, &types, &validators);

        let image = Arc::new(Object::new(Id::new("img-1"), "image", 0i64));
        ids.bind(image.id(), &image);
        let mut candidates = HashMap::new();
        candidates.insert("image1".to_string(), vec![image]);

        let descriptor = ActivityDescriptor {
            id: "act".into(),
            required_inputs: vec![RequiredInput {
                key: "image1".into(),
                type_tag: "image".into(),
                min_occurs: 1,
                max_occurs: 1,
                create_if_missing: false,
            }],
            sub_configuration: "sub".into(),
            validator_tags: vec![],
            parameters: vec![ActivityParameter::Object {
                replace: "INPUT".into(),
                by: "image1".into(),
            }],
        };
        let params = launcher.resolve_and_validate(&descriptor, &candidates).unwrap();
        assert_eq!(params.get("INPUT"), Some(&"img-1".to_string()));
    }

    #[test]
    fn retract_module_removes_only_that_modules_activities_and_validators() {
        let activities = ActivityRegistry::new();
        activities.register(ActivityDescriptor {
            id: "builtin-act".into(),
            required_inputs: vec![],
            sub_configuration: "sub".into(),
            validator_tags: vec![],
            parameters: vec![],
        });
        activities.register_for_module(
            ActivityDescriptor {
                id: "module-act".into(),
                required_inputs: vec![],
                sub_configuration: "sub".into(),
                validator_tags: vec![],
                parameters: vec![],
            },
            "sight.demo",
        );

        let validators = ValidatorRegistry::new();
        validators.register_object_validator("builtin-validator", Arc::new(RejectIfEmpty));
        validators.register_object_validator_for_module("module-validator", "sight.demo", Arc::new(RejectIfEmpty));

        activities.retract_module("sight.demo");
        validators.retract_module("sight.demo");

        assert!(activities.get("builtin-act").is_some());
        assert!(activities.get("module-act").is_none());

        let descriptor = ActivityDescriptor {
            id: "act".into(),
            required_inputs: vec![],
            sub_configuration: "sub".into(),
            validator_tags: vec!["builtin-validator".into()],
            parameters: vec![],
        };
        assert!(validators.run("builtin-validator", &descriptor, &HashMap::new()).is_ok());
        assert!(validators.run("module-validator", &descriptor, &HashMap::new()).is_err());
    }
}
