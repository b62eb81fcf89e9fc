use derive_more::Deref;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::ValidateLength;

/// Cheaply clonable, immutable list used inside configuration values.
#[derive(Clone, Debug, Serialize, Deserialize, Ord, PartialOrd, Eq, PartialEq, Deref)]
#[serde(transparent)]
pub struct ArcVec<T> {
    inner: Arc<Vec<T>>,
}

impl<T> ArcVec<T> {
    pub fn new<V: Into<Vec<T>>>(values: V) -> Self {
        Self {
            inner: Arc::new(values.into()),
        }
    }
}

impl<T> Default for ArcVec<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> ValidateLength<usize> for ArcVec<T> {
    fn length(&self) -> Option<usize> {
        Some(self.inner.len())
    }
}

impl<T> From<Vec<T>> for ArcVec<T> {
    fn from(value: Vec<T>) -> Self {
        Self::new(value)
    }
}

impl<T: Clone> From<&[T]> for ArcVec<T> {
    fn from(value: &[T]) -> Self {
        Self::new(value.to_vec())
    }
}

impl<T> AsRef<[T]> for ArcVec<T> {
    fn as_ref(&self) -> &[T] {
        self.inner.as_slice()
    }
}
