use std::sync::Arc;

use easy_ext::ext;

#[ext(ArcExt)]
pub impl<T: ?Sized> Arc<T> {
    /// Clones the pointer, not the value.
    ///
    /// Makes the intent clearer than `.clone()` when the pointee is also `Clone`.
    #[must_use]
    fn clone_arc(&self) -> Self {
        Self::clone(self)
    }

    /// Clone-on-write access to the pointee.
    ///
    /// Values shared through an `Arc` are treated as immutable.
    /// Callers that need to change one get a private copy unless they hold the only reference.
    fn make_mut(&mut self) -> &mut T
    where
        T: Clone,
    {
        Self::make_mut(self)
    }
}
