//! Outcome-category enumerations and canonical subset keys
//!
//! Every instrumented operation produces one result out of a closed, finite
//! set of categories (e.g. HIT / MISS / FAILURE). Categories carry a dense
//! index assigned at definition time, so per-category state lives in plain
//! arrays and subsets are a single `u64` bitset whose equality and hash are
//! independent of insertion order.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// A closed, finite enumeration of operation outcomes.
///
/// Implementations must provide a dense index: `index()` returns a value
/// below `ALL.len()`, unique per category, and `ALL` lists every category
/// exactly once. At most 64 categories are supported so that subsets fit in
/// one word. The [`outcome_enum!`](crate::outcome_enum) macro generates a
/// conforming implementation.
pub trait Outcome: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every category of this outcome kind, in index order.
    const ALL: &'static [Self];

    /// Dense index of this category, `< Self::ALL.len()`.
    fn index(self) -> usize;
}

/// Validate the density invariants of an outcome kind.
///
/// Returns a human-readable reason on failure. Called once per operation
/// kind at registry construction; a violation is a fatal configuration
/// error, never silently tolerated.
pub(crate) fn validate_outcome_kind<T: Outcome>() -> Result<(), String> {
    let n = T::ALL.len();
    if n == 0 {
        return Err("outcome kind has no categories".to_string());
    }
    if n > 64 {
        return Err(format!("outcome kind has {} categories (maximum 64)", n));
    }
    let mut seen = 0u64;
    for &category in T::ALL {
        let idx = category.index();
        if idx >= n {
            return Err(format!(
                "category {:?} has index {} outside 0..{}",
                category, idx, n
            ));
        }
        if seen & (1 << idx) != 0 {
            return Err(format!("duplicate category index {}", idx));
        }
        seen |= 1 << idx;
    }
    Ok(())
}

/// A set of outcome categories, used as the canonical compound-cache key.
///
/// Backed by a bitset over category indices: two sets built from the same
/// categories in any order compare equal and hash identically.
pub struct OutcomeSet<T: Outcome> {
    bits: u64,
    _marker: PhantomData<fn(T)>,
}

impl<T: Outcome> OutcomeSet<T> {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }

    /// A set containing exactly one category.
    #[must_use]
    pub fn singleton(category: T) -> Self {
        Self {
            bits: 1 << category.index(),
            _marker: PhantomData,
        }
    }

    /// Build a set from any iterable of categories. Duplicates collapse.
    pub fn of(categories: impl IntoIterator<Item = T>) -> Self {
        let mut bits = 0u64;
        for category in categories {
            bits |= 1 << category.index();
        }
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// The set of every category of this kind.
    #[must_use]
    pub fn all() -> Self {
        Self::of(T::ALL.iter().copied())
    }

    /// Whether `category` is a member.
    #[inline]
    #[must_use]
    pub fn contains(&self, category: T) -> bool {
        self.bits & (1 << category.index()) != 0
    }

    /// Number of member categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterate the member categories in index order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        T::ALL.iter().copied().filter(|c| self.contains(*c))
    }

    /// The single member of a singleton set, if this is one.
    #[must_use]
    pub fn as_singleton(&self) -> Option<T> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }
}

// Manual impls: derives would bound on `T: Clone` etc. even though only the
// bitset is stored.
impl<T: Outcome> Clone for OutcomeSet<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Outcome> Copy for OutcomeSet<T> {}

impl<T: Outcome> PartialEq for OutcomeSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T: Outcome> Eq for OutcomeSet<T> {}

impl<T: Outcome> Hash for OutcomeSet<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<T: Outcome> fmt::Debug for OutcomeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Outcome> FromIterator<T> for OutcomeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::of(iter)
    }
}

/// Define an outcome enumeration with a conforming [`Outcome`] impl.
///
/// Generates the enum with the standard derives, a dense index taken from
/// the declaration order, and the `ALL` constant.
///
/// # Example
///
/// ```
/// opstats::outcome_enum! {
///     /// Results of a cache lookup.
///     pub enum CacheOutcome { Hit, Miss, Failure }
/// }
///
/// use opstats::Outcome;
/// assert_eq!(CacheOutcome::ALL.len(), 3);
/// assert_eq!(CacheOutcome::Miss.index(), 1);
/// ```
#[macro_export]
macro_rules! outcome_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::Outcome for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[inline]
            fn index(self) -> usize {
                self as usize
            }
        }
    };
}
