/// Reports the serialized size of a value in bytes.
///
/// Byte size triggers of a batch policy are evaluated against this value, so implementations
/// should count what a downstream writer would actually emit rather than in-memory overhead.
pub trait SizeHint {
    /// Returns the approximate serialized size in bytes.
    fn size_hint(&self) -> usize;
}

impl<T> SizeHint for [T]
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.iter().map(SizeHint::size_hint).sum()
    }
}

impl<T> SizeHint for Vec<T>
where
    T: SizeHint,
{
    fn size_hint(&self) -> usize {
        self.as_slice().size_hint()
    }
}
