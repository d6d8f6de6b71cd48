//! Access classification for spawned call arguments
//!
//! Every argument of a spawn implements [`TaskArg`]. The wrapper type an
//! argument is passed in decides its access mode:
//!
//! - plain owned values and [`Val`] are private copies (no dependency)
//! - [`Read`](crate::Read) / [`ArrayRead`](crate::ArrayRead) are shared reads
//! - [`Write`](crate::Write) / [`ArrayWrite`](crate::ArrayWrite) are exclusive writes
//! - [`Ignore`] hides an argument from dependency tracking
//!
//! Types that are not `TaskArg` are rejected at compile time, so there is no
//! argument whose mode is unknown at spawn time.

use crate::descriptor::{DescriptorSet, Extent, ObjectDescriptor};
use crate::error::{SpawnError, SpawnResult};

/// An argument of a spawned call
///
/// `classify` runs on the spawning thread and reports the accesses the
/// argument performs. `bind` runs on the worker right before the body and
/// produces the value the body receives.
pub trait TaskArg: Send + 'static {
    /// Value handed to the task body
    type Bound;

    /// Report the accesses performed by this argument
    fn classify(&self, cx: &mut Classifier);

    /// Acquire the argument for execution
    fn bind(self) -> Self::Bound;
}

/// Collects the descriptors of one spawned call
#[derive(Debug)]
pub struct Classifier {
    overlap_detection: bool,
    ignore_depth: usize,
    /// Accesses as declared, including ignored ones; used for the alias check
    declared: Vec<ObjectDescriptor>,
    /// Accesses that take part in dependency tracking
    tracked: Vec<ObjectDescriptor>,
    /// Accesses held under a lock while the body runs, with real extents
    guarded: Vec<ObjectDescriptor>,
    error: Option<SpawnError>,
}

impl Classifier {
    /// Create a classifier
    ///
    /// With `overlap_detection` off, sub-block accesses are widened to the
    /// whole object.
    pub fn new(overlap_detection: bool) -> Self {
        Self {
            overlap_detection,
            ignore_depth: 0,
            declared: Vec::new(),
            tracked: Vec::new(),
            guarded: Vec::new(),
            error: None,
        }
    }

    /// Record an access the bound argument holds a lock for
    pub fn access(&mut self, desc: ObjectDescriptor) {
        self.guarded.push(desc.clone());
        self.claim(desc);
    }

    /// Record an access that orders the task but binds no lock
    ///
    /// Used by claims, which hand the body the bare object so it can
    /// delegate the access to subtasks.
    pub fn claim(&mut self, desc: ObjectDescriptor) {
        if self.ignore_depth == 0 {
            let mut tracked = desc.clone();
            if !self.overlap_detection {
                tracked.extent = Extent::Whole;
            }
            self.tracked.push(tracked);
        }
        self.declared.push(desc);
    }

    /// Reject the call; the first error wins
    pub fn reject(&mut self, err: SpawnError) {
        self.error.get_or_insert(err);
    }

    /// Classify nested arguments without tracking them
    pub fn ignored(&mut self, f: impl FnOnce(&mut Self)) {
        self.ignore_depth += 1;
        f(self);
        self.ignore_depth -= 1;
    }

    /// Check aliasing and return the coalesced tracked descriptors
    pub fn finish(self) -> SpawnResult<DescriptorSet> {
        self.finish_guarded().map(|classified| classified.descriptors)
    }

    /// Like [`finish`](Self::finish), keeping the guarded accesses
    pub(crate) fn finish_guarded(self) -> SpawnResult<Classified> {
        if let Some(err) = self.error {
            return Err(err);
        }
        for (i, a) in self.declared.iter().enumerate() {
            for b in &self.declared[i + 1..] {
                if a.overlaps(b) && (a.mode.is_write() || b.mode.is_write()) {
                    return Err(SpawnError::AliasedArgument { object: a.object });
                }
            }
        }
        Ok(Classified {
            descriptors: DescriptorSet::coalesce(self.tracked),
            guarded: self.guarded,
        })
    }
}

/// Outcome of classifying one call
#[derive(Debug)]
pub(crate) struct Classified {
    /// Coalesced descriptors used for dependency tracking
    pub descriptors: DescriptorSet,
    /// Accesses the body holds a lock for, ignored ones included
    pub guarded: Vec<ObjectDescriptor>,
}

/// Classify a full argument list
pub fn classify<A: TaskArg + ?Sized>(args: &A, overlap_detection: bool) -> SpawnResult<DescriptorSet> {
    classify_guarded(args, overlap_detection).map(|classified| classified.descriptors)
}

pub(crate) fn classify_guarded<A: TaskArg + ?Sized>(
    args: &A,
    overlap_detection: bool,
) -> SpawnResult<Classified> {
    let mut cx = Classifier::new(overlap_detection);
    args.classify(&mut cx);
    cx.finish_guarded()
}

/// Argument passed by value: the task gets its own copy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Val<T>(pub T);

impl<T: Send + 'static> TaskArg for Val<T> {
    type Bound = T;

    fn classify(&self, _cx: &mut Classifier) {}

    fn bind(self) -> T {
        self.0
    }
}

/// Argument excluded from dependency tracking
///
/// The wrapped argument is still bound normally; the caller asserts that the
/// task cannot race with others through it.
#[derive(Clone, Debug)]
pub struct Ignore<A>(pub A);

/// Exclude an argument from dependency tracking
pub fn ignore<A: TaskArg>(arg: A) -> Ignore<A> {
    Ignore(arg)
}

impl<A: TaskArg> TaskArg for Ignore<A> {
    type Bound = A::Bound;

    fn classify(&self, cx: &mut Classifier) {
        cx.ignored(|cx| self.0.classify(cx));
    }

    fn bind(self) -> A::Bound {
        self.0.bind()
    }
}

macro_rules! by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TaskArg for $ty {
                type Bound = $ty;

                fn classify(&self, _cx: &mut Classifier) {}

                fn bind(self) -> $ty {
                    self
                }
            }
        )*
    };
}

by_value!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

impl<A: TaskArg> TaskArg for Option<A> {
    type Bound = Option<A::Bound>;

    fn classify(&self, cx: &mut Classifier) {
        if let Some(arg) = self {
            arg.classify(cx);
        }
    }

    fn bind(self) -> Self::Bound {
        self.map(TaskArg::bind)
    }
}

impl<A: TaskArg> TaskArg for Vec<A> {
    type Bound = Vec<A::Bound>;

    fn classify(&self, cx: &mut Classifier) {
        for arg in self {
            arg.classify(cx);
        }
    }

    fn bind(self) -> Self::Bound {
        self.into_iter().map(TaskArg::bind).collect()
    }
}

macro_rules! tuple_args {
    ($($name:ident),*) => {
        impl<$($name: TaskArg),*> TaskArg for ($($name,)*) {
            type Bound = ($($name::Bound,)*);

            #[allow(non_snake_case, unused_variables)]
            fn classify(&self, cx: &mut Classifier) {
                let ($($name,)*) = self;
                $($name.classify(cx);)*
            }

            #[allow(non_snake_case, clippy::unused_unit)]
            fn bind(self) -> Self::Bound {
                let ($($name,)*) = self;
                ($($name.bind(),)*)
            }
        }
    };
}

tuple_args!();
tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);
tuple_args!(A, B, C, D, E, F, G);
tuple_args!(A, B, C, D, E, F, G, H);
tuple_args!(A, B, C, D, E, F, G, H, I);
tuple_args!(A, B, C, D, E, F, G, H, I, J);
tuple_args!(A, B, C, D, E, F, G, H, I, J, K);
tuple_args!(A, B, C, D, E, F, G, H, I, J, K, L);
