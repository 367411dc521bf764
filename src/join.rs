//! AND-join over async handles.
//!
//! [`when_all`] builds a [`JoinFrame`] over an ordered list
//! of operands and returns a `Handle<()>` that settles once
//! every operand has settled. [`wait_all`] does the same and
//! then blocks for it.
//!
//! The frame never fans out: it walks the operands left to
//! right (and each sequence front to back) and keeps at
//! most one continuation registered at any time. An operand
//! that is already settled when visited gets no
//! continuation at all. Settling with an error counts as
//! settled; the join never looks at values or errors.
//!
//! ```
//! use async_join::{wait_all, Handle, Promise};
//!
//! let a = Handle::ready(1u8);
//! let b = Promise::new();
//! let seq = vec![Handle::ready("x"), b.handle()];
//!
//! let joined = async_join::when_all((&a, &seq));
//! assert!(!joined.is_ready());
//!
//! b.set_value("y");
//! wait_all(&joined);
//! assert_eq!(seq[1].get().unwrap(), "y");
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::handle::{Handle, Promise, SharedState};

/// One argument of a join.
pub enum Operand {
    Single(Arc<dyn SharedState>),
    Sequence(Vec<Arc<dyn SharedState>>),
}

impl std::fmt::Debug for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Single(_) => f.write_str("Single"),
            Operand::Sequence(v) => write!(f, "Sequence({})", v.len()),
        }
    }
}

/// Types that can be joined on as a single operand.
pub trait IntoOperand {
    fn into_operand(self) -> Operand;
}

impl IntoOperand for Operand {
    fn into_operand(self) -> Operand {
        self
    }
}

impl IntoOperand for Arc<dyn SharedState> {
    fn into_operand(self) -> Operand {
        Operand::Single(self)
    }
}

impl IntoOperand for Vec<Arc<dyn SharedState>> {
    fn into_operand(self) -> Operand {
        Operand::Sequence(self)
    }
}

impl<T: Send + 'static> IntoOperand for Handle<T> {
    fn into_operand(self) -> Operand {
        Operand::Single(self.shared_state())
    }
}

impl<T: Send + 'static> IntoOperand for &Handle<T> {
    fn into_operand(self) -> Operand {
        Operand::Single(self.shared_state())
    }
}

impl<T: Send + 'static> IntoOperand for &[Handle<T>] {
    fn into_operand(self) -> Operand {
        Operand::Sequence(self.iter().map(Handle::shared_state).collect())
    }
}

impl<T: Send + 'static> IntoOperand for &Vec<Handle<T>> {
    fn into_operand(self) -> Operand {
        self.as_slice().into_operand()
    }
}

impl<T: Send + 'static, const N: usize> IntoOperand for &[Handle<T>; N] {
    fn into_operand(self) -> Operand {
        self[..].into_operand()
    }
}

/// A complete, ordered operand list.
///
/// Implemented for tuples (up to eight elements) of
/// [`IntoOperand`] types, for a bare handle or sequence
/// of handles, and for a prebuilt `Vec<Operand>`.
pub trait IntoOperands {
    fn into_operands(self) -> Vec<Operand>;
}

impl IntoOperands for Vec<Operand> {
    fn into_operands(self) -> Vec<Operand> {
        self
    }
}

impl IntoOperands for () {
    fn into_operands(self) -> Vec<Operand> {
        Vec::new()
    }
}

impl<T: Send + 'static> IntoOperands for &Handle<T> {
    fn into_operands(self) -> Vec<Operand> {
        vec![self.into_operand()]
    }
}

impl<T: Send + 'static> IntoOperands for &[Handle<T>] {
    fn into_operands(self) -> Vec<Operand> {
        vec![self.into_operand()]
    }
}

impl<T: Send + 'static> IntoOperands for &Vec<Handle<T>> {
    fn into_operands(self) -> Vec<Operand> {
        vec![self.into_operand()]
    }
}

macro_rules! tuple_operands {
    ($($name:ident)+) => {
        impl<$($name: IntoOperand),+> IntoOperands for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_operands(self) -> Vec<Operand> {
                let ($($name,)+) = self;
                vec![$($name.into_operand()),+]
            }
        }
    };
}

tuple_operands!(A);
tuple_operands!(A B);
tuple_operands!(A B C);
tuple_operands!(A B C D);
tuple_operands!(A B C D E);
tuple_operands!(A B C D E F);
tuple_operands!(A B C D E F G);
tuple_operands!(A B C D E F G H);

/// Traversal progress: the operand being visited and,
/// within a sequence operand, the element being visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Cursor {
    pub operand: usize,
    pub position: usize,
}

impl Cursor {
    fn next_operand(self) -> Cursor {
        Cursor {
            operand: self.operand + 1,
            position: 0,
        }
    }
}

/// The AND-join controller.
///
/// The promise completing the frame travels with the
/// cursor: whichever thread currently drives traversal
/// owns both, and hands them to the one continuation it
/// registers before returning.
pub struct JoinFrame {
    operands: Vec<Operand>,
    operand: AtomicUsize,
    position: AtomicUsize,
    registrations: AtomicUsize,
}

impl JoinFrame {
    pub fn new(operands: Vec<Operand>) -> Arc<Self> {
        Arc::new(JoinFrame {
            operands,
            operand: AtomicUsize::new(0),
            position: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
        })
    }

    /// Run the synchronous part of the traversal and return
    /// the frame's own handle. Never blocks.
    pub fn start(self: &Arc<Self>) -> Handle<()> {
        let done = Promise::new();
        let handle = done.handle();
        self.clone().drive(Cursor::default(), done);
        handle
    }

    /// Last recorded traversal position.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            operand: self.operand.load(Ordering::Acquire),
            position: self.position.load(Ordering::Acquire),
        }
    }

    /// Number of continuations registered so far.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    fn record(&self, cursor: Cursor) {
        debug_assert!(cursor >= self.cursor(), "join cursor moved backwards");
        self.operand.store(cursor.operand, Ordering::Release);
        self.position.store(cursor.position, Ordering::Release);
    }

    fn suspend(self: Arc<Self>, state: &Arc<dyn SharedState>, resume: Cursor, done: Promise<()>) {
        log::trace!(
            "join suspending at operand {} element {}",
            resume.operand, resume.position
        );
        self.registrations.fetch_add(1, Ordering::AcqRel);
        state.set_on_completed(Box::new(move || self.drive(resume, done)));
    }

    fn drive(self: Arc<Self>, mut cursor: Cursor, done: Promise<()>) {
        loop {
            self.record(cursor);
            let operand = match self.operands.get(cursor.operand) {
                Some(operand) => operand,
                None => {
                    log::trace!("join complete after {} operand(s)", self.operands.len());
                    done.set_value(());
                    return;
                }
            };

            match operand {
                Operand::Single(state) => {
                    if !settled_after_forcing(state) {
                        let next = cursor.next_operand();
                        return self.clone().suspend(state, next, done);
                    }
                }
                Operand::Sequence(states) => {
                    while let Some(state) = states.get(cursor.position) {
                        if !settled_after_forcing(state) {
                            return self.clone().suspend(state, cursor, done);
                        }
                        cursor.position += 1;
                        self.record(cursor);
                    }
                }
            }
            cursor = cursor.next_operand();
        }
    }
}

fn settled_after_forcing(state: &Arc<dyn SharedState>) -> bool {
    if state.is_ready() {
        return true;
    }
    state.execute_deferred();
    // Forcing may have settled it.
    state.is_ready()
}

/// Join on `operands` without blocking. The returned handle
/// settles once every operand has settled.
pub fn when_all<O: IntoOperands>(operands: O) -> Handle<()> {
    JoinFrame::new(operands.into_operands()).start()
}

/// Block until every operand has settled. All inputs stay
/// valid and readable afterwards.
pub fn wait_all<O: IntoOperands>(operands: O) {
    let joined = when_all(operands);
    if !joined.is_ready() {
        joined.wait();
    }
}

/// Block until every handle yielded by `iter` has settled.
pub fn wait_all_iter<'a, I, T>(iter: I)
where
    I: IntoIterator<Item = &'a Handle<T>>,
    T: Send + 'static,
{
    let states: Vec<_> = iter.into_iter().map(Handle::shared_state).collect();
    wait_all((states,));
}

/// Block until the next `count` handles of `iter` have
/// settled; returns the iterator positioned after the last
/// processed element. Stops early if `iter` runs out.
pub fn wait_all_n<'a, I, T>(mut iter: I, count: usize) -> I
where
    I: Iterator<Item = &'a Handle<T>>,
    T: Send + 'static,
{
    let states: Vec<_> = iter.by_ref().take(count).map(Handle::shared_state).collect();
    wait_all((states,));
    iter
}

/// Join on a fixed list of operands (handles or sequences
/// of handles) without blocking. Yields a `Handle<()>`.
#[macro_export]
macro_rules! when_all {
    ($($op:expr),* $(,)?) => {{
        let operands: ::std::vec::Vec<$crate::join::Operand> =
            vec![$($crate::join::IntoOperand::into_operand($op)),*];
        $crate::join::when_all(operands)
    }};
}

/// Block until every listed operand (handles or sequences
/// of handles) has settled.
#[macro_export]
macro_rules! wait_all {
    ($($op:expr),* $(,)?) => {{
        let operands: ::std::vec::Vec<$crate::join::Operand> =
            vec![$($crate::join::IntoOperand::into_operand($op)),*];
        $crate::join::wait_all(operands)
    }};
}
