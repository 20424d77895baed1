use super::frozen::{FrozenParameters, ParameterMap, UnhashableParameter};
use crate::error::ConstructionError;
use log::debug;
use lru::LruCache;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(32) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// In-process implementation of a worker, expensive to build.
pub trait Processor: Send + Sync + Sized + 'static {
    /// Builds an instance from its parameters. Cached instances are built
    /// without a workspace.
    fn construct(
        workspace: Option<&Path>,
        parameters: ParameterMap,
    ) -> Result<Self, ConstructionError>;
}

type Instance = Arc<dyn Any + Send + Sync>;
type Constructor = fn(Option<&Path>, ParameterMap) -> Result<Instance, ConstructionError>;

fn construct_erased<P: Processor>(
    workspace: Option<&Path>,
    parameters: ParameterMap,
) -> Result<Instance, ConstructionError> {
    Ok(Arc::new(P::construct(workspace, parameters)?))
}

/// Runtime handle on a [`Processor`] type; two classes are equal iff they
/// describe the same type.
#[derive(Clone, Copy)]
pub struct ProcessorClass {
    id: TypeId,
    name: &'static str,
    construct: Constructor,
}

impl ProcessorClass {
    pub fn of<P: Processor>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
            construct: construct_erased::<P>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ProcessorClass {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessorClass {}

impl fmt::Debug for ProcessorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessorClass").field(&self.name).finish()
    }
}

/// Result of a cache lookup.
#[derive(Clone)]
pub enum ProcessorLookup {
    Instance(Arc<dyn Any + Send + Sync>),
    /// No processor class was given, so there is nothing to build.
    NoProcessorClass,
}

impl ProcessorLookup {
    pub fn is_instance(&self) -> bool {
        matches!(self, ProcessorLookup::Instance(_))
    }

    pub fn downcast<P: Processor>(self) -> Option<Arc<P>> {
        match self {
            ProcessorLookup::Instance(instance) => instance.downcast::<P>().ok(),
            ProcessorLookup::NoProcessorClass => None,
        }
    }
}

impl fmt::Debug for ProcessorLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorLookup::Instance(_) => f.write_str("Instance(..)"),
            ProcessorLookup::NoProcessorClass => f.write_str("NoProcessorClass"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Unhashable(#[from] UnhashableParameter),
    #[error("failed to construct processor {processor}: {source}")]
    Construction {
        processor: &'static str,
        #[source]
        source: ConstructionError,
    },
    #[error("cached instance is not a {processor}")]
    TypeMismatch { processor: &'static str },
}

type CacheKey = (FrozenParameters, TypeId);
/// Held by the single caller building the instance for a key.
type BuildSlot = Arc<Mutex<()>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entries {
    ready: LruCache<CacheKey, Instance>,
    /// Keys under construction. They are not in `ready` and cannot be evicted.
    building: HashMap<CacheKey, BuildSlot>,
}

/// Bounded, least-recently-used cache of processor instances keyed by their
/// parameters and class.
///
/// The map lock is only held for bookkeeping. A key being built owns a build
/// slot whose lock is held during construction, so concurrent requests for the
/// same key wait for a single construction while other keys proceed. Only the
/// caller holding the current slot of a key may build it.
pub struct ProcessorCache {
    entries: Mutex<Entries>,
}

impl Default for ProcessorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                ready: LruCache::new(capacity),
                building: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.entries).ready.cap().get()
    }

    /// Number of built instances held.
    pub fn len(&self) -> usize {
        lock(&self.entries).ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).ready.clear();
    }

    /// Returns the cached instance for `parameters` and `class`, building it
    /// on a miss. Without a class there is nothing to build and
    /// [`ProcessorLookup::NoProcessorClass`] is returned.
    pub fn get(
        &self,
        parameters: &ParameterMap,
        class: Option<&ProcessorClass>,
    ) -> Result<ProcessorLookup, CacheError> {
        let Some(class) = class else {
            return Ok(ProcessorLookup::NoProcessorClass);
        };
        let key = (FrozenParameters::freeze(parameters)?, class.id);

        loop {
            let slot = {
                let mut entries = lock(&self.entries);
                if let Some(instance) = entries.ready.get(&key) {
                    debug!("Reusing cached {}", class.name);
                    return Ok(ProcessorLookup::Instance(instance.clone()));
                }
                entries.building.entry(key.clone()).or_default().clone()
            };

            let _building = lock(&slot);
            {
                let mut entries = lock(&self.entries);
                if let Some(instance) = entries.ready.get(&key) {
                    debug!("Reusing cached {}", class.name);
                    return Ok(ProcessorLookup::Instance(instance.clone()));
                }
                let current = entries
                    .building
                    .get(&key)
                    .is_some_and(|building| Arc::ptr_eq(building, &slot));
                if !current {
                    // the previous builder failed and released the key
                    continue;
                }
            }

            debug!("Constructing {}", class.name);
            let built = (class.construct)(None, parameters.clone());

            let mut entries = lock(&self.entries);
            entries.building.remove(&key);
            return match built {
                Ok(instance) => {
                    if let Some(((evicted, _), _)) = entries.ready.push(key, instance.clone()) {
                        debug!("Evicted least recently used processor with parameters {evicted:?}");
                    }
                    Ok(ProcessorLookup::Instance(instance))
                }
                Err(source) => Err(CacheError::Construction {
                    processor: class.name,
                    source,
                }),
            };
        }
    }

    /// Typed variant of [`ProcessorCache::get`].
    pub fn get_instance<P: Processor>(
        &self,
        parameters: &ParameterMap,
    ) -> Result<Arc<P>, CacheError> {
        let class = ProcessorClass::of::<P>();
        self.get(parameters, Some(&class))?
            .downcast::<P>()
            .ok_or(CacheError::TypeMismatch {
                processor: class.name,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Condvar};
    use std::thread;
    use std::time::Duration;

    fn params(value: Value) -> ParameterMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not a mapping"),
        }
    }

    macro_rules! counting_processor {
        ($name:ident, $counter:ident) => {
            static $counter: AtomicUsize = AtomicUsize::new(0);

            #[derive(Debug)]
            #[allow(dead_code)]
            struct $name {
                parameters: ParameterMap,
                had_workspace: bool,
            }

            impl Processor for $name {
                fn construct(
                    workspace: Option<&Path>,
                    parameters: ParameterMap,
                ) -> Result<Self, ConstructionError> {
                    $counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Self {
                        parameters,
                        had_workspace: workspace.is_some(),
                    })
                }
            }
        };
    }

    #[test]
    fn test_missing_class_returns_sentinel() {
        let cache = ProcessorCache::new();
        let lookup = cache.get(&params(json!({ "level": "line" })), None).unwrap();
        assert!(!lookup.is_instance());
        assert!(matches!(lookup, ProcessorLookup::NoProcessorClass));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reordered_parameters_hit_the_same_entry() {
        counting_processor!(Binarizer, BINARIZER_BUILDS);
        let cache = ProcessorCache::new();

        let mut first = ParameterMap::new();
        first.insert("level-of-operation".into(), json!("page"));
        first.insert("method".into(), json!({ "name": "ocropy", "threshold": 0.5 }));
        let mut second = ParameterMap::new();
        second.insert("method".into(), json!({ "threshold": 0.5, "name": "ocropy" }));
        second.insert("level-of-operation".into(), json!("page"));

        let a = cache.get_instance::<Binarizer>(&first).unwrap();
        let b = cache.get_instance::<Binarizer>(&second).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(BINARIZER_BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(a.parameters, first);
        assert!(!a.had_workspace);
    }

    #[test]
    fn test_classes_never_share_a_slot() {
        counting_processor!(Segmenter, SEGMENTER_BUILDS);
        counting_processor!(Recognizer, RECOGNIZER_BUILDS);
        let cache = ProcessorCache::new();
        let parameters = params(json!({ "model": "deu" }));

        let segmenter = ProcessorClass::of::<Segmenter>();
        let recognizer = ProcessorClass::of::<Recognizer>();
        assert_ne!(segmenter, recognizer);

        let a = cache.get(&parameters, Some(&segmenter)).unwrap();
        let b = cache.get(&parameters, Some(&recognizer)).unwrap();

        assert!(a.downcast::<Segmenter>().is_some());
        assert!(b.downcast::<Recognizer>().is_some());
        assert_eq!(SEGMENTER_BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(RECOGNIZER_BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        counting_processor!(Cropper, CROPPER_BUILDS);
        let cache = ProcessorCache::new();
        assert_eq!(cache.capacity(), 32);
        let key = |i: usize| params(json!({ "page": i }));

        for i in 0..32 {
            cache.get_instance::<Cropper>(&key(i)).unwrap();
        }
        // touch the oldest entry so the second one becomes least recently used
        cache.get_instance::<Cropper>(&key(0)).unwrap();
        assert_eq!(CROPPER_BUILDS.load(Ordering::SeqCst), 32);

        cache.get_instance::<Cropper>(&key(32)).unwrap();
        assert_eq!(cache.len(), 32);
        assert_eq!(CROPPER_BUILDS.load(Ordering::SeqCst), 33);

        cache.get_instance::<Cropper>(&key(0)).unwrap();
        cache.get_instance::<Cropper>(&key(2)).unwrap();
        assert_eq!(CROPPER_BUILDS.load(Ordering::SeqCst), 33);

        cache.get_instance::<Cropper>(&key(1)).unwrap();
        assert_eq!(CROPPER_BUILDS.load(Ordering::SeqCst), 34);
    }

    #[test]
    fn test_unhashable_parameters_are_rejected() {
        counting_processor!(Deskewer, DESKEWER_BUILDS);
        let cache = ProcessorCache::new();
        let err = cache
            .get_instance::<Deskewer>(&params(json!({ "angles": [0, 90] })))
            .unwrap_err();
        assert!(matches!(err, CacheError::Unhashable(ref e) if e.path == "angles"));
        assert_eq!(DESKEWER_BUILDS.load(Ordering::SeqCst), 0);
    }

    static FLAKY_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Flaky;

    impl Processor for Flaky {
        fn construct(
            _workspace: Option<&Path>,
            parameters: ParameterMap,
        ) -> Result<Self, ConstructionError> {
            FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            if parameters.get("model") == Some(&json!("missing")) {
                return Err(ConstructionError::new("model file not found"));
            }
            Ok(Flaky)
        }
    }

    #[test]
    fn test_construction_failures_are_not_cached() {
        let cache = ProcessorCache::new();
        let broken = params(json!({ "model": "missing" }));

        for attempt in 1..=2 {
            let err = cache.get_instance::<Flaky>(&broken).unwrap_err();
            assert!(matches!(err, CacheError::Construction { .. }));
            assert!(err.to_string().contains("model file not found"));
            assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), attempt);
        }
        assert!(cache.is_empty());
    }

    static SLOW_BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Slow;

    impl Processor for Slow {
        fn construct(
            _workspace: Option<&Path>,
            _parameters: ParameterMap,
        ) -> Result<Self, ConstructionError> {
            SLOW_BUILDS.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(Slow)
        }
    }

    #[test]
    fn test_concurrent_callers_share_one_construction() {
        let cache = ProcessorCache::new();
        let parameters = params(json!({ "dpi": 300 }));
        let callers = 16;
        let barrier = Barrier::new(callers);

        let instances: Vec<Arc<Slow>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache.get_instance::<Slow>(&parameters).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(SLOW_BUILDS.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    static GATED_GATE: Gate = Gate::new();

    #[derive(Debug)]
    struct Gated;

    impl Processor for Gated {
        fn construct(
            _workspace: Option<&Path>,
            parameters: ParameterMap,
        ) -> Result<Self, ConstructionError> {
            if parameters.get("wait") == Some(&json!(true)) {
                GATED_GATE.pass();
            }
            Ok(Gated)
        }
    }

    #[test]
    fn test_distinct_keys_do_not_block_each_other() {
        let cache = ProcessorCache::new();

        thread::scope(|scope| {
            let blocked = scope.spawn(|| cache.get_instance::<Gated>(&params(json!({ "wait": true }))));
            GATED_GATE.wait_entered(1);

            // completes while the other key is still under construction
            cache
                .get_instance::<Gated>(&params(json!({ "wait": false })))
                .unwrap();

            GATED_GATE.release();
            blocked.join().unwrap().unwrap();
        });

        assert_eq!(cache.len(), 2);
    }

    /// Blocks a construction until the test opens it.
    struct Gate {
        open: Mutex<bool>,
        opened: Condvar,
        entered: AtomicUsize,
    }

    impl Gate {
        const fn new() -> Self {
            Self {
                open: Mutex::new(false),
                opened: Condvar::new(),
                entered: AtomicUsize::new(0),
            }
        }

        fn pass(&self) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
        }

        fn wait_entered(&self, count: usize) {
            while self.entered.load(Ordering::SeqCst) < count {
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    static LAYOUT_GATE: Gate = Gate::new();
    static LAYOUT_BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Layout;

    impl Processor for Layout {
        fn construct(
            _workspace: Option<&Path>,
            parameters: ParameterMap,
        ) -> Result<Self, ConstructionError> {
            if parameters.get("slow") == Some(&json!(true)) {
                LAYOUT_BUILDS.fetch_add(1, Ordering::SeqCst);
                LAYOUT_GATE.pass();
            }
            Ok(Layout)
        }
    }

    #[test]
    fn test_key_under_construction_survives_eviction() {
        let cache = ProcessorCache::new();
        let slow = params(json!({ "slow": true }));

        let (first, second) = thread::scope(|scope| {
            let first = scope.spawn(|| cache.get_instance::<Layout>(&slow).unwrap());
            LAYOUT_GATE.wait_entered(1);

            // fill the cache while the slow key is still being built
            for page in 0..32 {
                cache
                    .get_instance::<Layout>(&params(json!({ "page": page })))
                    .unwrap();
            }
            let second = scope.spawn(|| cache.get_instance::<Layout>(&slow).unwrap());
            thread::sleep(Duration::from_millis(50));

            LAYOUT_GATE.release();
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_eq!(LAYOUT_BUILDS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &cache.get_instance::<Layout>(&slow).unwrap()));
        assert_eq!(cache.len(), 32);
    }

    static OCR_GATE: Gate = Gate::new();
    static OCR_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Ocr;

    impl Processor for Ocr {
        fn construct(
            _workspace: Option<&Path>,
            _parameters: ParameterMap,
        ) -> Result<Self, ConstructionError> {
            // the first attempt is held open and then fails
            if OCR_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                OCR_GATE.pass();
                return Err(ConstructionError::new("model still downloading"));
            }
            Ok(Ocr)
        }
    }

    #[test]
    fn test_waiter_after_failed_construction_builds_a_shared_instance() {
        let cache = ProcessorCache::new();
        let parameters = params(json!({ "model": "frk" }));

        let (failed, waited) = thread::scope(|scope| {
            let failing = scope.spawn(|| cache.get_instance::<Ocr>(&parameters));
            OCR_GATE.wait_entered(1);

            let waiting = scope.spawn(|| cache.get_instance::<Ocr>(&parameters));
            thread::sleep(Duration::from_millis(50));

            OCR_GATE.release();
            (failing.join().unwrap(), waiting.join().unwrap())
        });

        assert!(matches!(failed, Err(CacheError::Construction { .. })));
        let waited = waited.unwrap();
        assert_eq!(OCR_ATTEMPTS.load(Ordering::SeqCst), 2);

        let later = cache.get_instance::<Ocr>(&parameters).unwrap();
        assert!(Arc::ptr_eq(&waited, &later));
        assert_eq!(OCR_ATTEMPTS.load(Ordering::SeqCst), 2);
    }
}
