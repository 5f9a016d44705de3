/*!
 * Shared Segment Registry
 * Named segments reachable from every worker through a serializable handle
 */

use super::types::{SegmentKind, SharedHandle, SharedMemoryError, SharedMemoryResult};
use crate::core::id::segment_name;
use crate::ipc::router::RouteTable;
use crate::ipc::tracker::TrackerTable;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

// Process-wide registry used by default
static GLOBAL_REGISTRY: LazyLock<Arc<SegmentRegistry>> =
    LazyLock::new(|| Arc::new(SegmentRegistry::new()));

/// Backing state of a shared segment
#[derive(Clone)]
pub enum Segment {
    Counter(Arc<Mutex<i64>>),
    Tracker(Arc<Mutex<TrackerTable>>),
    Router(Arc<Mutex<RouteTable>>),
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Counter(_) => SegmentKind::Counter,
            Segment::Tracker(_) => SegmentKind::Tracker,
            Segment::Router(_) => SegmentKind::Router,
        }
    }
}

struct RegisteredSegment {
    segment: Segment,
    attachments: usize,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub segments: usize,
    pub attachments: usize,
}

/// Shared segment registry
///
/// # Performance
/// - Cache-line aligned for concurrent attach from many workers
#[repr(C, align(64))]
pub struct SegmentRegistry {
    segments: DashMap<String, RegisteredSegment, RandomState>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self {
            segments: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Process-wide registry
    pub fn global() -> Arc<SegmentRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register a segment under a fresh name
    pub fn create(&self, segment: Segment) -> SharedHandle {
        let handle = SharedHandle::new(segment_name(), segment.kind());
        self.segments.insert(
            handle.name.clone(),
            RegisteredSegment {
                segment,
                attachments: 0,
            },
        );
        info!(kind = %handle.kind, segment = %handle.name, "shared segment created");
        handle
    }

    /// Re-attach to the segment a handle names
    pub fn attach(&self, handle: &SharedHandle) -> SharedMemoryResult<Segment> {
        let mut entry = self
            .segments
            .get_mut(&handle.name)
            .ok_or_else(|| SharedMemoryError::NotFound(handle.name.clone()))?;

        let found = entry.segment.kind();
        if found != handle.kind {
            return Err(SharedMemoryError::KindMismatch {
                name: handle.name.clone(),
                expected: handle.kind,
                found,
            });
        }

        entry.attachments += 1;
        debug!(
            kind = %found,
            segment = %handle.name,
            attachments = entry.attachments,
            "attached to shared segment"
        );
        Ok(entry.segment.clone())
    }

    /// Remove a segment; existing attachments keep their state alive until dropped
    pub fn unlink(&self, handle: &SharedHandle) -> bool {
        match self.segments.remove(&handle.name) {
            Some((name, entry)) => {
                info!(
                    kind = %handle.kind,
                    segment = %name,
                    attachments = entry.attachments,
                    "shared segment unlinked"
                );
                true
            }
            None => {
                warn!(segment = %handle.name, "unlink of unknown segment");
                false
            }
        }
    }

    pub fn contains(&self, handle: &SharedHandle) -> bool {
        self.segments.contains_key(&handle.name)
    }

    pub fn stats(&self) -> RegistryStats {
        self.segments
            .iter()
            .fold(RegistryStats::default(), |mut stats, entry| {
                stats.segments += 1;
                stats.attachments += entry.attachments;
                stats
            })
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing::subscriber::with_default;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Records the message of every event it sees
    struct RecordingLayer(Arc<Mutex<Vec<String>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for RecordingLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0.lock().push(message);
        }
    }

    #[test]
    fn test_registry_events_reach_tracing_subscriber() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let subscriber =
            tracing_subscriber::registry().with(RecordingLayer(Arc::clone(&messages)));

        with_default(subscriber, || {
            let registry = SegmentRegistry::new();
            let handle = registry.create(Segment::Counter(Arc::new(Mutex::new(0))));
            registry.attach(&handle).unwrap();
            registry.unlink(&handle);
            registry.unlink(&handle);
        });

        assert_eq!(
            *messages.lock(),
            vec![
                "shared segment created".to_string(),
                "attached to shared segment".to_string(),
                "shared segment unlinked".to_string(),
                "unlink of unknown segment".to_string(),
            ]
        );
    }

    #[test]
    fn test_create_attach_unlink() {
        let registry = SegmentRegistry::new();
        let handle = registry.create(Segment::Counter(Arc::new(Mutex::new(3))));
        assert_eq!(handle.kind, SegmentKind::Counter);
        assert!(registry.contains(&handle));

        match registry.attach(&handle).unwrap() {
            Segment::Counter(value) => assert_eq!(*value.lock(), 3),
            _ => panic!("wrong segment kind"),
        }
        assert_eq!(
            registry.stats(),
            RegistryStats {
                segments: 1,
                attachments: 1
            }
        );

        assert!(registry.unlink(&handle));
        assert!(!registry.unlink(&handle));
        assert_eq!(
            registry.attach(&handle).err(),
            Some(SharedMemoryError::NotFound(handle.name.clone()))
        );
    }

    #[test]
    fn test_attach_with_wrong_kind() {
        let registry = SegmentRegistry::new();
        let handle = registry.create(Segment::Counter(Arc::new(Mutex::new(0))));
        let forged = SharedHandle::new(handle.name.clone(), SegmentKind::Router);

        let err = registry.attach(&forged).err().unwrap();
        assert_eq!(
            err,
            SharedMemoryError::KindMismatch {
                name: handle.name,
                expected: SegmentKind::Router,
                found: SegmentKind::Counter,
            }
        );
    }
}
