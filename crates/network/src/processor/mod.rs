//! Memoization of processor instances.

mod cache;
mod frozen;

pub use cache::{
    CacheError, Processor, ProcessorCache, ProcessorClass, ProcessorLookup, DEFAULT_CACHE_CAPACITY,
};
pub use frozen::{FrozenParameters, FrozenValue, ParameterMap, UnhashableParameter};
