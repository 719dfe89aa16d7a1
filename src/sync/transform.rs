/**
 * Object identity transforms applied between the remote collection and the cache
 */
use std::borrow::Cow;
use std::marker::PhantomData;

/// A remote object that knows its own kind
pub trait TypedResource {
    /// Kind recorded on the object, if any
    fn kind(&self) -> Option<Cow<'_, str>>;

    /// Fills the kind when the object arrived without one
    fn ensure_kind(&mut self, kind: &str);
}

/// Converts remote objects into cached values and merges later states into
/// them.
pub trait Transform<K, V>: Send + Sync {
    /// Cache representation of a freshly received object
    fn create(&self, object: K) -> V;

    /// Merges `incoming` into `current`; returns whether anything changed.
    /// Returning `false` must leave `current` untouched.
    fn update(&self, incoming: &K, current: &mut V) -> bool;
}

/// Stores remote objects as they are and replaces them on any structural
/// difference
pub struct Identity;

impl<K> Transform<K, K> for Identity
where
    K: Clone + PartialEq,
{
    fn create(&self, object: K) -> K {
        object
    }

    fn update(&self, incoming: &K, current: &mut K) -> bool {
        if incoming == current {
            false
        } else {
            current.clone_from(incoming);
            true
        }
    }
}

/// Transform built from a pair of closures
pub struct FnTransform<K, V, C, U> {
    create: C,
    update: U,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, C, U> FnTransform<K, V, C, U>
where
    C: Fn(K) -> V + Send + Sync,
    U: Fn(&K, &mut V) -> bool + Send + Sync,
{
    pub const fn new(create: C, update: U) -> Self {
        Self {
            create,
            update,
            _marker: PhantomData,
        }
    }
}

impl<K, V, C, U> Transform<K, V> for FnTransform<K, V, C, U>
where
    C: Fn(K) -> V + Send + Sync,
    U: Fn(&K, &mut V) -> bool + Send + Sync,
{
    fn create(&self, object: K) -> V {
        (self.create)(object)
    }

    fn update(&self, incoming: &K, current: &mut V) -> bool {
        (self.update)(incoming, current)
    }
}
