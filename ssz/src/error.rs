use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ReadError {
    #[error("expected vector to have {expected} elements, found {actual} elements")]
    VectorSizeMismatch { expected: usize, actual: usize },
    #[error("expected list to have no more than {maximum} elements, found {actual} elements")]
    ListTooLong { maximum: usize, actual: usize },
    #[error("expected bit list to have no more than {maximum} bits, found {actual} bits")]
    BitListTooLong { maximum: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index {index} does not fit in usize")]
    DoesNotFitInUsize { index: u64 },
    #[error("index {index} is out of bounds for collection of length {length}")]
    OutOfBounds { length: usize, index: usize },
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("list is full")]
    ListFull,
}
