//! Request-scoped attributes.
//!
//! Middleware hands data to the handlers it wraps by attaching it to the
//! [`Context`](crate::Context). Keys are typed: an [`AttributeKey<T>`] can only
//! ever store and return a `T`, and two keys only collide when both the name
//! and the value type agree.
//!
//! ```rust
//! use si::{AttributeKey, Attributes};
//!
//! const USER_ID: AttributeKey<u64> = AttributeKey::new("user_id");
//!
//! let outer = Attributes::default();
//! let inner = outer.with(&USER_ID, 42);
//!
//! assert_eq!(inner.get(&USER_ID), Some(&42));
//! assert_eq!(outer.get(&USER_ID), None);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed, named key into [`Attributes`].
///
/// Declare keys as constants next to the middleware that sets them.
pub struct AttributeKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _value: PhantomData }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

type Slot = (TypeId, &'static str);
type Value = Arc<dyn Any + Send + Sync>;

/// Copy-on-write attribute map.
///
/// Cloning is one atomic increment. Writing through a clone detaches it from
/// the map it was cloned from, so a snapshot taken before a write never
/// observes that write.
#[derive(Clone, Default)]
pub struct Attributes {
    map: Arc<HashMap<Slot, Value>>,
}

impl Attributes {
    /// Returns the value most recently bound to `key`, if any.
    pub fn get<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.map
            .get(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Binds `key` to `value`, replacing any earlier binding in this map.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>, value: T) {
        Arc::make_mut(&mut self.map).insert((TypeId::of::<T>(), key.name), Arc::new(value));
    }

    /// Returns a new map carrying every binding of `self` plus `key → value`.
    /// `self` is left untouched.
    pub fn with<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>, value: T) -> Self {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    pub fn contains<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys().map(|(_, name)| name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: AttributeKey<String> = AttributeKey::new("name");
    const COUNT: AttributeKey<u32> = AttributeKey::new("count");

    #[test]
    fn absent_key_returns_none() {
        let attrs = Attributes::default();
        assert!(attrs.get(&NAME).is_none());
        assert!(attrs.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let mut attrs = Attributes::default();
        attrs.insert(&COUNT, 1);
        attrs.insert(&COUNT, 2);
        assert_eq!(attrs.get(&COUNT), Some(&2));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn snapshot_is_not_mutated_by_later_writes() {
        let mut attrs = Attributes::default();
        attrs.insert(&COUNT, 1);
        let snapshot = attrs.clone();

        attrs.insert(&COUNT, 2);
        attrs.insert(&NAME, "alice".to_owned());

        assert_eq!(snapshot.get(&COUNT), Some(&1));
        assert!(snapshot.get(&NAME).is_none());
        assert_eq!(attrs.get(&COUNT), Some(&2));
    }

    #[test]
    fn same_name_different_type_does_not_collide() {
        const AS_TEXT: AttributeKey<String> = AttributeKey::new("id");
        const AS_NUMBER: AttributeKey<u64> = AttributeKey::new("id");

        let attrs = Attributes::default()
            .with(&AS_TEXT, "abc".to_owned())
            .with(&AS_NUMBER, 7);

        assert_eq!(attrs.get(&AS_TEXT).map(String::as_str), Some("abc"));
        assert_eq!(attrs.get(&AS_NUMBER), Some(&7));
    }
}
