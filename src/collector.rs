//! Collector seam: the external component that produces pixel data.
//!
//! The cache core treats the collector as an opaque synchronous call on the
//! generator's worker thread. It is surfaced as a pure result-returning
//! interface: `None` (or an all-empty result) records a failed generation,
//! which the cache persists so the key is not retried until the source
//! changes. Collectors must not panic across the call boundary.

use crate::types::AuxiliaryData;

/// The three derived representations a collector produces for one source.
///
/// An empty variant means the collector could not produce that
/// representation; it is persisted as a null column so later requests for
/// the variant replay the failure instead of regenerating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedImages {
    /// Full-resolution encoded image.
    pub image: Vec<u8>,
    /// Mid-size encoded preview.
    pub mid_size: Vec<u8>,
    /// Small encoded preview.
    pub small: Vec<u8>,
}

impl CollectedImages {
    /// Create a result with all three variants populated.
    pub fn new(image: Vec<u8>, mid_size: Vec<u8>, small: Vec<u8>) -> Self {
        Self {
            image,
            mid_size,
            small,
        }
    }

    /// Whether every variant is empty, i.e. the generation failed outright.
    pub fn is_null(&self) -> bool {
        self.image.is_empty() && self.mid_size.is_empty() && self.small.is_empty()
    }
}

/// Produces pixel data for a source resource.
///
/// Invoked synchronously on the generator's worker thread, at most once per
/// in-flight key. Implementations may spawn subprocesses internally but
/// must return rather than panic on failure.
pub trait ImageCollector: Send + Sync {
    /// Produce the image variants for `name`.
    ///
    /// Returns `None` when no image could be produced at all; the failure
    /// is cached.
    fn collect(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: &AuxiliaryData,
    ) -> Option<CollectedImages>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collected_images_is_null_when_all_empty() {
        assert!(CollectedImages::default().is_null());
    }

    #[test]
    fn test_collected_images_not_null_with_single_variant() {
        let images = CollectedImages {
            mid_size: vec![1, 2, 3],
            ..Default::default()
        };
        assert!(!images.is_null());
    }

    #[test]
    fn test_collector_as_trait_object() {
        struct FixedCollector;

        impl ImageCollector for FixedCollector {
            fn collect(
                &self,
                _name: &str,
                _extra_id: &str,
                _auxiliary: &AuxiliaryData,
            ) -> Option<CollectedImages> {
                Some(CollectedImages::new(vec![1], vec![2], vec![3]))
            }
        }

        let collector: Box<dyn ImageCollector> = Box::new(FixedCollector);
        let result = collector.collect("foo.png", "", &AuxiliaryData::None);
        assert_eq!(result.unwrap().image, vec![1]);
    }
}
