//! Composition of the shared resource identity.
//!
//! Every signal provider is stamped with the same immutable [`Resource`],
//! composed in a fixed order so the result is reproducible from the
//! configuration alone: semantic defaults, then environment detectors, then
//! the caller's override, then ordered customizers. Later stages win on key
//! collision — with the one exception that a detector can never displace the
//! caller-provided service name.

use std::collections::HashMap;

use opentelemetry::{Key, KeyValue, Value};
use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_NAME, SERVICE_NAMESPACE, SERVICE_VERSION,
};

use crate::error::Error;

/// A transform applied to the merged-so-far resource; returns its
/// replacement. Any error aborts telemetry construction.
pub type ResourceCustomizer = Box<dyn Fn(Resource) -> Result<Resource, Error> + Send + Sync>;

/// Inputs to the resource composition.
///
/// The scalar identity fields come from configuration; detectors, the
/// override factory, and customizers are supplied programmatically.
#[derive(Default)]
pub struct ResourceSettings {
    /// Required logical service name; never silently replaced by a detector.
    pub service_name: String,
    pub service_version: Option<String>,
    pub deployment_environment: Option<String>,
    pub service_namespace: Option<String>,
    /// Free-form identity attributes, applied with the semantic defaults.
    pub attributes: Vec<KeyValue>,
    /// Environment detectors, applied in order after the defaults.
    pub detectors: Vec<Box<dyn ResourceDetector>>,
    /// When set, the returned resource replaces colliding keys from the
    /// stages before it.
    pub override_resource: Option<Box<dyn Fn() -> Resource + Send + Sync>>,
    /// Ordered transforms over the merged resource; `None` entries are
    /// skipped.
    pub customizers: Vec<Option<ResourceCustomizer>>,
}

impl std::fmt::Debug for ResourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSettings")
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("deployment_environment", &self.deployment_environment)
            .field("service_namespace", &self.service_namespace)
            .field("attributes", &self.attributes)
            .field("detectors", &self.detectors.len())
            .field("override_resource", &self.override_resource.is_some())
            .field("customizers", &self.customizers.len())
            .finish()
    }
}

/// An ordered key→value accumulator: later writers override earlier ones.
#[derive(Default)]
struct AttributeSet {
    order: Vec<Key>,
    values: HashMap<Key, Value>,
}

impl AttributeSet {
    fn put(&mut self, key: Key, value: Value) {
        if self.values.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
    }

    fn extend_from_resource(&mut self, resource: &Resource) {
        for (key, value) in resource.iter() {
            self.put(key.clone(), value.clone());
        }
    }

    fn get(&self, key: &Key) -> Option<&Value> {
        self.values.get(key)
    }

    fn into_key_values(mut self) -> Vec<KeyValue> {
        self.order
            .into_iter()
            .filter_map(|key| {
                let value = self.values.remove(&key)?;
                Some(KeyValue::new(key, value))
            })
            .collect()
    }
}

pub(crate) fn build_resource(settings: ResourceSettings) -> Result<Resource, Error> {
    if settings.service_name.trim().is_empty() {
        return Err(Error::MissingServiceName);
    }

    let service_name_key = Key::from_static_str(SERVICE_NAME);
    let mut attributes = AttributeSet::default();

    // Stage 1: semantic defaults plus free-form user attributes.
    attributes.put(
        service_name_key.clone(),
        Value::from(settings.service_name.clone()),
    );
    if let Some(version) = settings.service_version {
        attributes.put(Key::from_static_str(SERVICE_VERSION), Value::from(version));
    }
    if let Some(environment) = settings.deployment_environment {
        attributes.put(
            Key::from_static_str(DEPLOYMENT_ENVIRONMENT_NAME),
            Value::from(environment),
        );
    }
    if let Some(namespace) = settings.service_namespace {
        attributes.put(
            Key::from_static_str(SERVICE_NAMESPACE),
            Value::from(namespace),
        );
    }
    for kv in settings.attributes {
        attributes.put(kv.key, kv.value);
    }

    // Stage 2: detectors, in order. The caller's service name survives them.
    for detector in settings.detectors {
        let detected = Resource::builder_empty()
            .with_detector(detector)
            .build();
        for (key, value) in detected.iter() {
            if *key == service_name_key {
                continue;
            }
            attributes.put(key.clone(), value.clone());
        }
    }

    // Stage 3: override factory replaces colliding keys outright.
    if let Some(factory) = settings.override_resource {
        attributes.extend_from_resource(&factory());
    }

    let mut resource = Resource::builder_empty()
        .with_attributes(attributes.into_key_values())
        .build();

    // Stage 4: customizers, in order; each replaces the resource wholesale.
    for customizer in settings.customizers.into_iter().flatten() {
        resource = customizer(resource)?;
    }

    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(resource: &Resource, key: &str) -> Option<String> {
        resource
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.to_string())
    }

    fn base_settings() -> ResourceSettings {
        ResourceSettings {
            service_name: "checkout".to_owned(),
            service_version: Some("1.4.2".to_owned()),
            deployment_environment: Some("staging".to_owned()),
            ..Default::default()
        }
    }

    #[derive(Debug)]
    struct FixedDetector(Vec<KeyValue>);

    impl ResourceDetector for FixedDetector {
        fn detect(&self) -> Resource {
            Resource::builder_empty()
                .with_attributes(self.0.clone())
                .build()
        }
    }

    #[test]
    fn semantic_defaults_are_stamped() {
        let resource = build_resource(base_settings()).unwrap();
        assert_eq!(lookup(&resource, SERVICE_NAME).as_deref(), Some("checkout"));
        assert_eq!(lookup(&resource, SERVICE_VERSION).as_deref(), Some("1.4.2"));
        assert_eq!(
            lookup(&resource, DEPLOYMENT_ENVIRONMENT_NAME).as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn missing_service_name_is_fatal() {
        let settings = ResourceSettings {
            service_name: "  ".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            build_resource(settings),
            Err(Error::MissingServiceName)
        ));
    }

    #[test]
    fn detectors_override_defaults_but_not_service_name() {
        let mut settings = base_settings();
        settings.detectors = vec![Box::new(FixedDetector(vec![
            KeyValue::new(SERVICE_NAME, "impostor"),
            KeyValue::new("host.name", "worker-3"),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, "prod"),
        ]))];

        let resource = build_resource(settings).unwrap();
        assert_eq!(lookup(&resource, SERVICE_NAME).as_deref(), Some("checkout"));
        assert_eq!(lookup(&resource, "host.name").as_deref(), Some("worker-3"));
        // Detectors do win over non-protected defaults.
        assert_eq!(
            lookup(&resource, DEPLOYMENT_ENVIRONMENT_NAME).as_deref(),
            Some("prod")
        );
    }

    #[test]
    fn later_detectors_override_earlier_ones() {
        let mut settings = base_settings();
        settings.detectors = vec![
            Box::new(FixedDetector(vec![KeyValue::new("region", "eu-west-1")])),
            Box::new(FixedDetector(vec![KeyValue::new("region", "us-east-2")])),
        ];
        let resource = build_resource(settings).unwrap();
        assert_eq!(lookup(&resource, "region").as_deref(), Some("us-east-2"));
    }

    #[test]
    fn override_factory_replaces_colliding_keys() {
        let mut settings = base_settings();
        settings.override_resource = Some(Box::new(|| {
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new(SERVICE_NAME, "renamed"),
                    KeyValue::new("team", "platform"),
                ])
                .build()
        }));

        let resource = build_resource(settings).unwrap();
        assert_eq!(lookup(&resource, SERVICE_NAME).as_deref(), Some("renamed"));
        assert_eq!(lookup(&resource, "team").as_deref(), Some("platform"));
        // Non-colliding defaults survive.
        assert_eq!(lookup(&resource, SERVICE_VERSION).as_deref(), Some("1.4.2"));
    }

    #[test]
    fn customizers_run_in_order_and_none_is_skipped() {
        let mut settings = base_settings();
        settings.customizers = vec![
            Some(Box::new(|resource: Resource| {
                let mut kvs: Vec<KeyValue> = resource
                    .iter()
                    .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                    .collect();
                kvs.push(KeyValue::new("stage", "first"));
                Ok(Resource::builder_empty().with_attributes(kvs).build())
            }) as ResourceCustomizer),
            None,
            Some(Box::new(|resource: Resource| {
                let mut kvs: Vec<KeyValue> = resource
                    .iter()
                    .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                    .collect();
                kvs.push(KeyValue::new("stage", "second"));
                Ok(Resource::builder_empty().with_attributes(kvs).build())
            }) as ResourceCustomizer),
        ];

        let resource = build_resource(settings).unwrap();
        assert_eq!(lookup(&resource, "stage").as_deref(), Some("second"));
    }

    #[test]
    fn customizer_error_aborts_construction() {
        let mut settings = base_settings();
        settings.customizers = vec![Some(Box::new(|_| {
            Err(Error::ResourceCustomizer("nope".to_owned()))
        }) as ResourceCustomizer)];
        assert!(matches!(
            build_resource(settings),
            Err(Error::ResourceCustomizer(_))
        ));
    }
}
