use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use crate::handle::Callback;
use crate::join::{IntoOperands, JoinFrame};
use crate::*;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| femme::with_level(log::LevelFilter::Debug));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Registered(usize),
    Settled(usize),
}

/// A shared state that records every registration made on
/// it and every readiness query.
struct Probe {
    id: usize,
    ready: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
    queries: AtomicUsize,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Probe {
    fn new(id: usize, ready: bool, events: &Arc<Mutex<Vec<Event>>>) -> Arc<Probe> {
        Arc::new(Probe {
            id,
            ready: AtomicBool::new(ready),
            callbacks: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            events: events.clone(),
        })
    }

    fn settle(&self) {
        let callbacks = {
            let mut callbacks = self.callbacks.lock().unwrap();
            self.ready.store(true, Ordering::SeqCst);
            self.events.lock().unwrap().push(Event::Settled(self.id));
            std::mem::take(&mut *callbacks)
        };
        for f in callbacks {
            f();
        }
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn state(self: &Arc<Self>) -> Arc<dyn SharedState> {
        self.clone()
    }
}

impl SharedState for Probe {
    fn is_ready(&self) -> bool {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.ready.load(Ordering::SeqCst)
    }

    fn execute_deferred(&self) {}

    fn set_on_completed(&self, f: Callback) {
        let mut callbacks = self.callbacks.lock().unwrap();
        if self.ready.load(Ordering::SeqCst) {
            drop(callbacks);
            f();
            return;
        }
        self.events.lock().unwrap().push(Event::Registered(self.id));
        callbacks.push(f);
    }

    fn wait(&self) {
        while !self.ready.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }
}

fn settle_later<T: Send + 'static>(
    promise: Promise<T>,
    value: T,
    after: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(after);
        promise.set_value(value);
    })
}

#[test]
fn three_singles_wait_for_the_late_one() {
    init_logging();
    let start = Instant::now();

    let one = Handle::ready(1);
    let two = Handle::ready(2);
    let three = Promise::new();
    let late = three.handle();
    let setter = settle_later(three, 3, Duration::from_millis(50));

    let joined = when_all((&one, &two, &late));
    wait_all(&joined);

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(late.is_ready());
    assert_eq!(
        (one.get().unwrap(), two.get().unwrap(), late.get().unwrap()),
        (1, 2, 3)
    );
    setter.join().unwrap();
}

#[test]
fn sequence_registers_only_on_the_unready_element() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let probes: Vec<_> = (0..5).map(|i| Probe::new(i, i != 2, &events)).collect();
    let states: Vec<_> = probes.iter().map(Probe::state).collect();

    let frame = JoinFrame::new((states,).into_operands());
    let joined = frame.start();

    assert!(!joined.is_ready());
    assert_eq!(frame.registrations(), 1);
    assert_eq!(*events.lock().unwrap(), [Event::Registered(2)]);
    assert_eq!(frame.cursor(), join::Cursor { operand: 0, position: 2 });
    assert_eq!(probes[3].queries(), 0);

    probes[2].settle();

    assert!(joined.is_ready());
    assert_eq!(frame.registrations(), 1);
    assert!(probes[3].queries() > 0);
    assert!(probes[4].queries() > 0);
    assert_eq!(frame.cursor(), join::Cursor { operand: 1, position: 0 });
}

#[test]
fn traversal_never_skips_ahead() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let probes: Vec<_> = (0..4).map(|i| Probe::new(i, false, &events)).collect();
    let operands: Vec<Operand> = probes.iter().map(|p| p.state().into_operand()).collect();

    let frame = JoinFrame::new(operands);
    let joined = frame.start();
    assert_eq!(frame.registrations(), 1);

    // Settling out of order does not move the traversal.
    probes[2].settle();
    assert_eq!(frame.registrations(), 1);
    assert_eq!(frame.cursor().operand, 0);

    probes[0].settle();
    assert_eq!(frame.cursor().operand, 1);
    probes[1].settle();
    assert!(!joined.is_ready());
    probes[3].settle();
    assert!(joined.is_ready());

    use Event::*;
    assert_eq!(
        *events.lock().unwrap(),
        [
            Registered(0),
            Settled(2),
            Settled(0),
            Registered(1),
            Settled(1),
            Registered(3),
            Settled(3),
        ]
    );
    assert_eq!(frame.registrations(), 3);
}

#[test]
fn join_is_ready_exactly_when_everything_is() {
    let single = Promise::<u16>::new();
    let seq: Vec<Promise<u16>> = (0..3).map(|_| Promise::new()).collect();
    let empty: Vec<Handle<u16>> = Vec::new();

    let single_handle = single.handle();
    let seq_handles: Vec<_> = seq.iter().map(Promise::handle).collect();
    let joined = when_all((&seq_handles, &empty, &single_handle));

    for (i, p) in seq.into_iter().enumerate().rev() {
        assert!(!joined.is_ready());
        p.set_value(i as u16);
    }
    assert!(!joined.is_ready());
    single.set_error(Error::msg("late failure"));
    assert!(joined.is_ready());
}

#[test]
fn inputs_are_untouched_by_the_join() {
    let handles: Vec<Handle<i64>> = (0..6)
        .map(|i| {
            if i % 3 == 0 {
                Handle::failed(Error::msg(format!("failure {}", i)))
            } else {
                Handle::ready(i * 10)
            }
        })
        .collect();
    let expected: Vec<String> = handles.iter().map(|h| format!("{:?}", h.get())).collect();

    let lazy = Handle::deferred(|| Ok("forced"));
    crate::wait_all!(&handles, &lazy);

    let after: Vec<String> = handles.iter().map(|h| format!("{:?}", h.get())).collect();
    assert_eq!(after, expected);
    assert_eq!(lazy.get().unwrap(), "forced");
}

#[test]
fn join_settles_once() {
    let p = Promise::new();
    let joined = when_all((&p.handle(),));
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    joined.set_on_completed(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    p.set_value(());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let h = hits.clone();
    joined.set_on_completed(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(joined.get().is_ok());
    assert!(joined.get().is_ok());
}

#[test]
fn empty_join_is_immediately_ready() {
    let frame = JoinFrame::new(().into_operands());
    assert!(frame.start().is_ready());
    assert_eq!(frame.registrations(), 0);
    wait_all(());
}

#[test]
fn concurrent_settlement_from_many_threads() {
    init_logging();
    let promises: Vec<Promise<usize>> = (0..32).map(|_| Promise::new()).collect();
    let handles: Vec<_> = promises.iter().map(Promise::handle).collect();
    let pairs: Vec<_> = (0..8).map(|_| Promise::<(u8, u8)>::new()).collect();
    let pair_handles: Vec<_> = pairs.iter().map(Promise::handle).collect();

    let setters: Vec<_> = promises
        .into_iter()
        .enumerate()
        .map(|(i, p)| settle_later(p, i, Duration::from_millis((i as u64 * 7) % 23)))
        .chain(pairs.into_iter().map(|p| settle_later(p, (1, 2), Duration::from_millis(5))))
        .collect();

    wait_all((&handles, &pair_handles));
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(h.get().unwrap(), i);
    }
    for s in setters {
        s.join().unwrap();
    }
}

/// Sub-invocation failure carrying the index of the failing
/// partition.
#[derive(Debug, thiserror::Error)]
#[error("E{0}")]
struct SubFailure(u8);

#[derive(Clone)]
struct FailOn;

impl Algorithm for FailOn {
    type Args = Value<u8>;
    type Output = u8;

    fn call(&self, _: Policy, _: bool, index: u8) -> Result<u8> {
        Err(Error::new(SubFailure(index)))
    }
}

/// Fails with an aggregate that holds nothing.
#[derive(Clone)]
struct FailEmpty;

impl Algorithm for FailEmpty {
    type Args = Value<u8>;
    type Output = u8;

    fn call(&self, _: Policy, _: bool, _: u8) -> Result<u8> {
        Err(Error::List(ExceptionList::new()))
    }
}

/// Fans out to two partitions and reports every failure.
struct FanOut<A = FailOn> {
    dispatcher: Dispatcher,
    sub: A,
}

impl FanOut {
    fn new(dispatcher: &Dispatcher) -> Self {
        FanOut {
            dispatcher: dispatcher.clone(),
            sub: FailOn,
        }
    }
}

impl<A> Algorithm for FanOut<A>
where
    A: Algorithm<Args = Value<u8>, Output = u8> + Clone,
{
    type Args = ();
    type Output = Vec<u8>;

    fn call(&self, policy: Policy, sequential: bool, _: ()) -> Result<Vec<u8>> {
        let handles = self.dispatcher.dispatch_segments(
            vec![(ObjectId(1), Value(1)), (ObjectId(2), Value(2))],
            self.sub.clone(),
            policy,
            sequential,
        );
        gather(&handles)
    }
}

fn placement() -> Arc<ColocationMap> {
    Arc::new(
        ColocationMap::new()
            .with_object(ObjectId(0), LocalityId(0))
            .with_object(ObjectId(1), LocalityId(1))
            .with_object(ObjectId(2), LocalityId(2)),
    )
}

fn sub_failures(err: Error) -> Vec<u8> {
    match err {
        Error::List(list) => list
            .iter()
            .map(|e| match e {
                Error::Failed(inner) => inner
                    .downcast_ref::<SubFailure>()
                    .map(|f| f.0)
                    .unwrap_or(u8::MAX),
                _ => u8::MAX,
            })
            .collect(),
        other => panic!("expected a composite error, got {:?}", other),
    }
}

#[test]
fn dispatch_raises_every_sub_failure_in_order() {
    init_logging();
    let dispatcher = Dispatcher::new(placement(), Arc::new(InlineTransport));
    let fan_out = FanOut::new(&dispatcher);

    let err = dispatcher
        .dispatch(ObjectId(0), fan_out, Policy::Parallel, false, ())
        .unwrap_err();
    assert_eq!(sub_failures(err), [1, 2]);
}

#[test]
fn empty_sub_failures_never_dispatch_as_success() {
    init_logging();
    let dispatcher = Dispatcher::new(placement(), Arc::new(InlineTransport));
    let fan_out = FanOut {
        dispatcher: dispatcher.clone(),
        sub: FailEmpty,
    };

    match dispatcher.dispatch(ObjectId(0), fan_out, Policy::Parallel, false, ()) {
        Err(Error::List(list)) => {
            assert_eq!(list.len(), 1);
            assert!(matches!(list.iter().next(), Some(Error::Inconsistent(_))));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn dispatch_async_defers_failures_into_the_handle() {
    let dispatcher = Dispatcher::new(placement(), Arc::new(InlineTransport));
    let fan_out = FanOut::new(&dispatcher);

    let handle = dispatcher.dispatch_async(ObjectId(0), fan_out, Policy::ParallelTask, false, ());
    assert!(handle.has_error());
    assert_eq!(sub_failures(handle.error().unwrap()), [1, 2]);
}

cfg_async_std! {
    #[test]
    fn dispatch_over_a_thread_pool() {
        init_logging();
        let transport = Arc::new(SpawnerTransport::new(AsyncStdSpawner));
        let dispatcher = Dispatcher::new(placement(), transport);
        let fan_out = FanOut::new(&dispatcher);

        let err = dispatcher
            .dispatch(ObjectId(0), fan_out, Policy::Parallel, false, ())
            .unwrap_err();
        assert_eq!(sub_failures(err), [1, 2]);

        let ok = dispatcher.dispatch_async(ObjectId(1), Echo, Policy::Sequenced, true, Value(9));
        assert_eq!(ok.get().unwrap(), 9);
    }

    #[derive(Clone)]
    struct Echo;

    impl Algorithm for Echo {
        type Args = Value<u8>;
        type Output = u8;

        fn call(&self, _: Policy, _: bool, v: u8) -> Result<u8> {
            Ok(v)
        }
    }

    #[async_std::test]
    async fn joins_can_be_awaited() {
        let exec = Executor::new(AsyncStdSpawner);
        let handles = exec.bulk_async_execute(|i: u64| i * i, 0..16);
        when_all(&handles).await.unwrap();
        let squares: u64 = handles.iter().map(|h| h.get().unwrap()).sum();
        assert_eq!(squares, (0..16).map(|i| i * i).sum::<u64>());
    }
}
