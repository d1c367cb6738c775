//! Metric extractors and their registration table
//!
//! An extractor declares the event types it handles up front. The registry
//! turns those declarations into the interest set requested from the server
//! and a routing table from event type to extractor slots.

use std::collections::HashMap;

use contracts::{AggregateRecord, BuildDescriptor, TypedEvent};

/// Per-build metric accumulator.
///
/// A fresh instance is created for every build; state is never shared.
pub trait MetricExtractor: Send {
    /// Observe one event of a declared type, in stream order.
    fn handle(&mut self, event: &TypedEvent);

    /// Called once when the build's stream ends, for extractors registered
    /// with `FINALIZES = true`. Calls `emit` zero or more times.
    fn finalize(&mut self, _emit: &mut dyn FnMut(AggregateRecord)) {}
}

/// Static registration data for an extractor type
pub trait RegisteredExtractor: MetricExtractor + Sized + 'static {
    /// Name used in logs
    const NAME: &'static str;

    /// Event type names routed to `handle`
    const EVENT_TYPES: &'static [&'static str];

    /// Whether `finalize` participates in session completion
    const FINALIZES: bool = false;

    fn create(build: &BuildDescriptor) -> Self;
}

fn create_boxed<E: RegisteredExtractor>(build: &BuildDescriptor) -> Box<dyn MetricExtractor> {
    Box::new(E::create(build))
}

/// Type-erased registration entry
#[derive(Clone, Copy)]
pub struct ExtractorRegistration {
    name: &'static str,
    event_types: &'static [&'static str],
    finalizes: bool,
    factory: fn(&BuildDescriptor) -> Box<dyn MetricExtractor>,
}

impl ExtractorRegistration {
    pub fn of<E: RegisteredExtractor>() -> Self {
        Self {
            name: E::NAME,
            event_types: E::EVENT_TYPES,
            finalizes: E::FINALIZES,
            factory: create_boxed::<E>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event_types(&self) -> &'static [&'static str] {
        self.event_types
    }

    pub fn finalizes(&self) -> bool {
        self.finalizes
    }
}

impl std::fmt::Debug for ExtractorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistration")
            .field("name", &self.name)
            .field("event_types", &self.event_types)
            .field("finalizes", &self.finalizes)
            .finish()
    }
}

/// Fixed set of extractors, frozen at construction.
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    registrations: Vec<ExtractorRegistration>,
    /// Union of declared types, first-declared order
    interest: Vec<&'static str>,
    /// Event type -> extractor slots in registration order
    routes: HashMap<&'static str, Vec<usize>>,
    /// Slots whose `finalize` runs at session end
    finalizers: Vec<usize>,
}

impl ExtractorRegistry {
    pub fn new(registrations: Vec<ExtractorRegistration>) -> Self {
        let mut interest = Vec::new();
        let mut routes: HashMap<&'static str, Vec<usize>> = HashMap::new();
        let mut finalizers = Vec::new();

        for (slot, registration) in registrations.iter().enumerate() {
            for &event_type in registration.event_types {
                let slots = routes.entry(event_type).or_default();
                if slots.is_empty() {
                    interest.push(event_type);
                }
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
            if registration.finalizes {
                finalizers.push(slot);
            }
        }

        Self {
            registrations,
            interest,
            routes,
            finalizers,
        }
    }

    /// Registry holding the built-in extractors
    pub fn with_defaults() -> Self {
        Self::new(vec![ExtractorRegistration::of::<
            crate::PackingAndUnpackingExtractor,
        >()])
    }

    /// Event types requested from every per-build stream
    pub fn interest_set(&self) -> &[&'static str] {
        &self.interest
    }

    pub fn is_interested(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    pub fn registrations(&self) -> &[ExtractorRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// One fresh extractor per registration, in registration order
    pub fn instantiate(&self, build: &BuildDescriptor) -> Vec<Box<dyn MetricExtractor>> {
        self.registrations
            .iter()
            .map(|registration| (registration.factory)(build))
            .collect()
    }

    pub(crate) fn route(&self, event_type: &str) -> &[usize] {
        self.routes.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn finalizers(&self) -> &[usize] {
        &self.finalizers
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Starts;

    impl MetricExtractor for Starts {
        fn handle(&mut self, _event: &TypedEvent) {}
    }

    impl RegisteredExtractor for Starts {
        const NAME: &'static str = "starts";
        const EVENT_TYPES: &'static [&'static str] = &["BuildStarted", "BuildStarted"];

        fn create(_build: &BuildDescriptor) -> Self {
            Starts
        }
    }

    struct Lifecycle;

    impl MetricExtractor for Lifecycle {
        fn handle(&mut self, _event: &TypedEvent) {}
    }

    impl RegisteredExtractor for Lifecycle {
        const NAME: &'static str = "lifecycle";
        const EVENT_TYPES: &'static [&'static str] = &["BuildStarted", "BuildFinished"];
        const FINALIZES: bool = true;

        fn create(_build: &BuildDescriptor) -> Self {
            Lifecycle
        }
    }

    fn registry() -> ExtractorRegistry {
        ExtractorRegistry::new(vec![
            ExtractorRegistration::of::<Starts>(),
            ExtractorRegistration::of::<Lifecycle>(),
        ])
    }

    #[test]
    fn test_interest_set_is_ordered_union() {
        assert_eq!(registry().interest_set(), &["BuildStarted", "BuildFinished"]);
    }

    #[test]
    fn test_routes_in_registration_order_without_duplicates() {
        let registry = registry();
        assert_eq!(registry.route("BuildStarted"), &[0, 1]);
        assert_eq!(registry.route("BuildFinished"), &[1]);
        assert!(registry.route("TaskStarted").is_empty());
        assert!(!registry.is_interested("TaskStarted"));
    }

    #[test]
    fn test_only_finalizing_extractors_are_finalizers() {
        assert_eq!(registry().finalizers(), &[1]);
    }

    #[test]
    fn test_instantiate_one_per_registration() {
        let build = BuildDescriptor::new("https://ge", "b1", false);
        assert_eq!(registry().instantiate(&build).len(), 2);
    }

    #[test]
    fn test_default_registry() {
        let registry = ExtractorRegistry::default();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.registrations()[0].name(), "pack-unpack-timing");
        assert!(registry.is_interested("BuildCachePackStarted"));
        assert_eq!(registry.interest_set().len(), 11);
    }
}
