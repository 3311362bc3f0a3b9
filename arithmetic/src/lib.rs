#![expect(
    clippy::wrong_self_convention,
    reason = "This is needlessly strict. See <https://github.com/rust-lang/rust-clippy/issues/6727>."
)]

use core::num::{NonZeroU64, NonZeroUsize};

use easy_ext::ext;
use num_integer::Roots as _;
use typenum::{NonZero, Unsigned};

#[ext(NonZeroExt)]
pub impl<N: Unsigned + NonZero> N {
    #[inline]
    #[must_use]
    fn non_zero() -> NonZeroU64 {
        Self::U64
            .try_into()
            .expect("the bound on N ensures that it is nonzero")
    }
}

#[ext(UsizeExt)]
pub impl usize {
    #[inline]
    #[must_use]
    fn is_divisible_by(self, factor: NonZeroUsize) -> bool {
        self % factor == 0
    }

    #[inline]
    #[must_use]
    fn div_typenum<N: Unsigned + NonZero>(self) -> Self {
        self / N::USIZE
    }

    #[inline]
    #[must_use]
    fn mod_typenum<N: Unsigned + NonZero>(self) -> Self {
        self % N::USIZE
    }
}

#[ext(U64Ext)]
pub impl u64 {
    #[inline]
    #[must_use]
    fn is_divisible_by(self, factor: NonZeroU64) -> bool {
        self % factor == 0
    }

    #[inline]
    #[must_use]
    fn prev_multiple_of(self, factor: NonZeroU64) -> Self {
        self - self % factor
    }

    #[inline]
    #[must_use]
    fn div_typenum<N: Unsigned + NonZero>(self) -> Self {
        self / N::U64
    }

    #[inline]
    #[must_use]
    fn mod_typenum<N: Unsigned + NonZero>(self) -> Self {
        self % N::U64
    }

    /// Integer square root rounded down.
    ///
    /// Floating point arithmetic is not deterministic enough to be used in consensus code.
    #[inline]
    #[must_use]
    fn integer_sqrt(self) -> Self {
        self.sqrt()
    }
}
