//! Event dispatch: per-aggregate tables mapping an event type tag to the one
//! handler that applies it.
//!
//! Tables are built and validated once, in [`EventProcessor::register`]. The
//! hot path, [`DispatchTable::apply`], is a single hash lookup per event.
use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet, hash_map::Entry},
    fmt,
    sync::Arc,
};

use tracing::instrument;

use crate::{Aggregate, Error, Event, Result};

type Handler<A> = Box<dyn Fn(&mut A, &<A as Aggregate>::Event) + Send + Sync>;

/// Handler declarations collected from [`Aggregate::handlers`].
pub struct Handlers<A: Aggregate> {
    declared: Vec<(&'static str, Handler<A>)>,
}

impl<A: Aggregate> Handlers<A> {
    fn new() -> Self {
        Self {
            declared: Vec::new(),
        }
    }

    /// Declares the handler for events tagged `event_type`.
    pub fn on<F>(&mut self, event_type: &'static str, handler: F) -> &mut Self
    where
        F: Fn(&mut A, &A::Event) + Send + Sync + 'static,
    {
        self.declared.push((event_type, Box::new(handler)));
        self
    }
}

/// The validated handler table of one aggregate type.
pub struct DispatchTable<A: Aggregate> {
    handlers: HashMap<&'static str, Handler<A>>,
}

impl<A: Aggregate> fmt::Debug for DispatchTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<_> = self.handlers.keys().collect();
        event_types.sort();
        f.debug_struct("DispatchTable")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .field("event_types", &event_types)
            .finish()
    }
}

impl<A: Aggregate> DispatchTable<A> {
    /// Collects `A`'s handler declarations and validates them.
    pub fn build() -> Result<Self> {
        let mut declarations = Handlers::new();
        A::handlers(&mut declarations);
        Self::from_handlers(declarations)
    }

    fn from_handlers(declarations: Handlers<A>) -> Result<Self> {
        let registration_error = |reason: String| Error::Registration {
            aggregate_type: A::AGGREGATE_TYPE,
            reason,
        };
        let known: HashSet<&str> = <A::Event as Event>::event_types().iter().copied().collect();

        let mut handlers = HashMap::with_capacity(declarations.declared.len());
        for (event_type, handler) in declarations.declared {
            if event_type.is_empty() {
                return Err(registration_error("handler declared for an empty event type".into()));
            }
            if !known.contains(event_type) {
                return Err(registration_error(format!(
                    "handler for `{event_type}` does not accept any event of this aggregate"
                )));
            }
            match handlers.entry(event_type) {
                Entry::Occupied(_) => {
                    return Err(registration_error(format!(
                        "event type `{event_type}` maps to more than one handler"
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(handler);
                }
            }
        }
        Ok(Self { handlers })
    }

    /// Returns `true` if an event with this tag can be applied.
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Applies `event` to `aggregate` with its registered handler.
    pub fn apply(&self, aggregate: &mut A, event: &A::Event) -> Result<()> {
        let event_type = event.event_type();
        let handler = self.handlers.get(event_type).ok_or_else(|| Error::UnhandledEvent {
            aggregate_type: A::AGGREGATE_TYPE,
            event_type: event_type.to_string(),
        })?;
        handler(aggregate, event);
        Ok(())
    }
}

/// Owned registry of dispatch tables, one per aggregate type.
///
/// Build one per application (or per test), register every aggregate type
/// up front, then share it behind an `Arc` with the rehydrator and the
/// repository.
#[derive(Default)]
pub struct EventProcessor {
    tables: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
}

impl fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.names.values().collect();
        registered.sort();
        f.debug_struct("EventProcessor")
            .field("registered", &registered)
            .finish()
    }
}

impl EventProcessor {
    /// Creates an empty processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and validates the dispatch table of `A`.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub fn register<A: Aggregate>(&mut self) -> Result<()> {
        let type_id = TypeId::of::<A>();
        if self.tables.contains_key(&type_id) {
            return Err(Error::Registration {
                aggregate_type: A::AGGREGATE_TYPE,
                reason: "aggregate type is already registered".into(),
            });
        }
        let table = DispatchTable::<A>::build()?;
        self.tables.insert(type_id, Arc::new(table));
        self.names.insert(type_id, A::AGGREGATE_TYPE);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<A: Aggregate>(mut self) -> Result<Self> {
        self.register::<A>()?;
        Ok(self)
    }

    /// Returns `true` once `A` has been registered.
    pub fn is_registered<A: Aggregate>(&self) -> bool {
        self.tables.contains_key(&TypeId::of::<A>())
    }

    /// Returns the dispatch table of `A`.
    pub fn table<A: Aggregate>(&self) -> Result<Arc<DispatchTable<A>>> {
        self.tables
            .get(&TypeId::of::<A>())
            .cloned()
            .and_then(|table| table.downcast::<DispatchTable<A>>().ok())
            .ok_or_else(|| Error::Registration {
                aggregate_type: A::AGGREGATE_TYPE,
                reason: "aggregate type is not registered".into(),
            })
    }

    /// Applies `event` to `aggregate` through the table registered for `A`.
    ///
    /// An unregistered aggregate type has no handlers at all, so it fails
    /// with [`Error::UnhandledEvent`] like any other missing handler.
    pub fn apply<A: Aggregate>(&self, aggregate: &mut A, event: &A::Event) -> Result<()> {
        match self.table::<A>() {
            Ok(table) => table.apply(aggregate, event),
            Err(_) => Err(Error::UnhandledEvent {
                aggregate_type: A::AGGREGATE_TYPE,
                event_type: event.event_type().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Originator, async_trait};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented(u32),
        Reset,
    }

    impl Event for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Incremented(_) => "Incremented",
                Self::Reset => "Reset",
            }
        }

        fn event_version(&self) -> u16 {
            1
        }

        fn event_types() -> &'static [&'static str] {
            &["Incremented", "Reset"]
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct Never;

    macro_rules! counter_aggregate {
        ($name:ident, $tag:literal, |$h:ident| $body:block) => {
            #[derive(Debug)]
            struct $name {
                id: uuid::Uuid,
                total: u32,
            }

            impl Originator for $name {
                type Memento = u32;
                fn create_memento(&self) -> u32 {
                    self.total
                }
                fn restore_memento(&mut self, memento: u32) {
                    self.total = memento;
                }
            }

            #[async_trait]
            impl Aggregate for $name {
                const AGGREGATE_TYPE: &'static str = $tag;
                type Id = uuid::Uuid;
                type Event = CounterEvent;
                type Command = ();
                type Error = Never;

                fn new(id: uuid::Uuid) -> Self {
                    Self { id, total: 0 }
                }
                fn id(&self) -> &uuid::Uuid {
                    &self.id
                }
                fn handlers($h: &mut Handlers<Self>) $body
                async fn handle(&self, _: ()) -> std::result::Result<Vec<CounterEvent>, Never> {
                    Ok(vec![])
                }
            }
        };
    }

    counter_aggregate!(Counter, "counter", |h| {
        h.on("Incremented", |c: &mut Counter, event: &CounterEvent| {
            if let CounterEvent::Incremented(by) = event {
                c.total += *by;
            }
        })
        .on("Reset", |c: &mut Counter, _: &CounterEvent| c.total = 0);
    });

    counter_aggregate!(PartialCounter, "partial-counter", |h| {
        h.on("Incremented", |c: &mut PartialCounter, event: &CounterEvent| {
            if let CounterEvent::Incremented(by) = event {
                c.total += *by;
            }
        });
    });

    counter_aggregate!(DuplicateCounter, "duplicate-counter", |h| {
        h.on("Reset", |c: &mut DuplicateCounter, _: &CounterEvent| c.total = 0)
            .on("Reset", |c: &mut DuplicateCounter, _: &CounterEvent| c.total = 1);
    });

    counter_aggregate!(ForeignCounter, "foreign-counter", |h| {
        h.on("Decremented", |_: &mut ForeignCounter, _: &CounterEvent| {});
    });

    counter_aggregate!(BlankCounter, "blank-counter", |h| {
        h.on("", |_: &mut BlankCounter, _: &CounterEvent| {});
    });

    #[test]
    fn registered_handlers_mutate_state() {
        let processor = EventProcessor::new().with::<Counter>().expect("register");
        let mut counter = Counter::new(uuid::Uuid::nil());

        processor
            .apply(&mut counter, &CounterEvent::Incremented(3))
            .expect("apply");
        processor
            .apply(&mut counter, &CounterEvent::Incremented(4))
            .expect("apply");
        assert_eq!(counter.total, 7);

        processor.apply(&mut counter, &CounterEvent::Reset).expect("apply");
        assert_eq!(counter.total, 0);
    }

    #[test]
    fn missing_handler_is_unhandled_event() {
        let processor = EventProcessor::new()
            .with::<PartialCounter>()
            .expect("register");
        let mut counter = PartialCounter::new(uuid::Uuid::nil());

        let err = processor
            .apply(&mut counter, &CounterEvent::Reset)
            .expect_err("no handler for Reset");
        assert_eq!(
            err,
            Error::UnhandledEvent {
                aggregate_type: "partial-counter",
                event_type: "Reset".into(),
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn unregistered_aggregate_is_unhandled_event() {
        let processor = EventProcessor::new();
        let mut counter = Counter::new(uuid::Uuid::nil());
        let err = processor
            .apply(&mut counter, &CounterEvent::Reset)
            .expect_err("nothing registered");
        assert!(matches!(err, Error::UnhandledEvent { .. }));
        assert!(processor.table::<Counter>().is_err());
    }

    #[test]
    fn duplicate_handlers_are_rejected() {
        let err = EventProcessor::new()
            .with::<DuplicateCounter>()
            .expect_err("duplicate");
        assert!(matches!(
            err,
            Error::Registration { aggregate_type: "duplicate-counter", ref reason } if reason.contains("more than one handler")
        ));
    }

    #[test]
    fn handler_for_foreign_event_type_is_rejected() {
        let err = EventProcessor::new()
            .with::<ForeignCounter>()
            .expect_err("unknown tag");
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[test]
    fn empty_event_type_is_rejected() {
        let err = EventProcessor::new()
            .with::<BlankCounter>()
            .expect_err("blank tag");
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[test]
    fn registering_twice_is_rejected() {
        let mut processor = EventProcessor::new();
        processor.register::<Counter>().expect("first registration");
        let err = processor.register::<Counter>().expect_err("second registration");
        assert!(matches!(err, Error::Registration { .. }));
        assert!(processor.is_registered::<Counter>());
    }

    #[test]
    fn independent_processors_do_not_share_tables() {
        let first = EventProcessor::new().with::<Counter>().expect("register");
        let second = EventProcessor::new();
        assert!(first.is_registered::<Counter>());
        assert!(!second.is_registered::<Counter>());
    }

    #[test]
    fn table_reports_handled_types() {
        let table = DispatchTable::<PartialCounter>::build().expect("build");
        assert!(table.handles("Incremented"));
        assert!(!table.handles("Reset"));
    }
}
