//! Moving results and arguments between the distributed
//! and the partition-local view.
//!
//! An algorithm shipped to a partition runs against the
//! partition's local storage: positions it receives are
//! [`LocalPosition`]s and positions it returns are local
//! too. [`Localize`] turns the caller's arguments into the
//! local view; [`Adapt`] turns the algorithm's result back
//! into the caller's distributed view.
use std::fmt;

use crate::dispatch::ObjectId;
use crate::handle::Handle;

/// A cursor into the storage of one partition, as seen by
/// code running next to that storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalPosition {
    pub partition: ObjectId,
    pub offset: usize,
}

impl LocalPosition {
    pub fn new(partition: ObjectId, offset: usize) -> Self {
        LocalPosition { partition, offset }
    }

    /// The position `n` elements further in the same
    /// partition.
    pub fn advance(self, n: usize) -> Self {
        LocalPosition {
            offset: self.offset + n,
            ..self
        }
    }
}

/// A position in a partitioned sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    partition: ObjectId,
    offset: usize,
}

impl Position {
    pub fn new(partition: ObjectId, offset: usize) -> Self {
        Position { partition, offset }
    }

    pub fn partition(&self) -> ObjectId {
        self.partition
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.partition, self.offset)
    }
}

/// Re-attach a partition-local result to the distributed
/// view. Pure and structural.
pub trait Adapt: Send + 'static {
    type Output: Send + 'static;

    fn adapt(self) -> Self::Output;
}

/// Turn a distributed argument into its partition-local
/// view.
pub trait Localize: Send + 'static {
    type Local: Send + 'static;

    fn localize(self) -> Self::Local;
}

/// Opt an arbitrary value out of adaptation: it crosses
/// unchanged in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Value<T>(pub T);

impl<T: Send + 'static> Adapt for Value<T> {
    type Output = T;
    fn adapt(self) -> T {
        self.0
    }
}

impl<T: Send + 'static> Localize for Value<T> {
    type Local = T;
    fn localize(self) -> T {
        self.0
    }
}

macro_rules! unchanged {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Adapt for $ty {
                type Output = $ty;
                #[inline]
                fn adapt(self) -> $ty {
                    self
                }
            }

            impl Localize for $ty {
                type Local = $ty;
                #[inline]
                fn localize(self) -> $ty {
                    self
                }
            }
        )*
    };
}

unchanged!(
    (), bool, char, String,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
);

impl Adapt for LocalPosition {
    type Output = Position;

    fn adapt(self) -> Position {
        Position::new(self.partition, self.offset)
    }
}

impl Localize for Position {
    type Local = LocalPosition;

    fn localize(self) -> LocalPosition {
        LocalPosition::new(self.partition, self.offset)
    }
}

impl<A: Adapt, B: Adapt> Adapt for (A, B) {
    type Output = (A::Output, B::Output);

    fn adapt(self) -> Self::Output {
        (self.0.adapt(), self.1.adapt())
    }
}

impl<T: Adapt> Adapt for Option<T> {
    type Output = Option<T::Output>;

    fn adapt(self) -> Self::Output {
        self.map(Adapt::adapt)
    }
}

impl<T: Adapt> Adapt for Vec<T> {
    type Output = Vec<T::Output>;

    fn adapt(self) -> Self::Output {
        self.into_iter().map(Adapt::adapt).collect()
    }
}

/// Adaptation of an asynchronous result is deferred to a
/// continuation on the settled value.
impl<L: Adapt + Clone> Adapt for Handle<L> {
    type Output = Handle<L::Output>;

    fn adapt(self) -> Self::Output {
        self.then(|result| result.map(Adapt::adapt))
    }
}

impl<T: Localize> Localize for Option<T> {
    type Local = Option<T::Local>;

    fn localize(self) -> Self::Local {
        self.map(Localize::localize)
    }
}

impl<T: Localize> Localize for Vec<T> {
    type Local = Vec<T::Local>;

    fn localize(self) -> Self::Local {
        self.into_iter().map(Localize::localize).collect()
    }
}

macro_rules! tuple_localize {
    ($($name:ident)+) => {
        impl<$($name: Localize),+> Localize for ($($name,)+) {
            type Local = ($($name::Local,)+);

            #[allow(non_snake_case)]
            fn localize(self) -> Self::Local {
                let ($($name,)+) = self;
                ($($name.localize(),)+)
            }
        }
    };
}

tuple_localize!(A);
tuple_localize!(A B);
tuple_localize!(A B C);
tuple_localize!(A B C D);
