//! Same-fill page detection.
//!
//! Pages consisting of one repeated machine word (all zeros being the
//! overwhelmingly common case) are recorded as a flag plus the fill value
//! and consume no pool storage at all.
//!
//! Detection works on `u64` words, not bytes, so patterns such as a
//! repeated pointer value also qualify.

use crate::PAGE_SIZE;

const WORDS: usize = PAGE_SIZE / 8;

/// Detect whether a page consists entirely of one repeated `u64` word.
///
/// Compares the first and last words before committing to a full scan,
/// which rejects the vast majority of non-uniform pages in two loads.
///
/// Returns `Some(fill_value)` if every word matches, `None` otherwise.
#[inline]
#[must_use]
pub fn page_same_filled(page: &[u8; PAGE_SIZE]) -> Option<u64> {
    // SAFETY: every read stays within the PAGE_SIZE byte array, and
    // read_unaligned carries no alignment requirement, so this is sound
    // for any caller-supplied buffer.
    let base = page.as_ptr().cast::<u64>();
    let read = |i: usize| unsafe { base.add(i).read_unaligned() };

    let val = read(0);
    if val != read(WORDS - 1) {
        return None;
    }
    for i in 1..WORDS - 1 {
        if read(i) != val {
            return None;
        }
    }
    Some(val)
}

/// Fill a page with a repeated `u64` word (memset_l equivalent).
#[inline]
pub fn fill_page_word(page: &mut [u8; PAGE_SIZE], value: u64) {
    for chunk in page.chunks_exact_mut(8) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Fill an arbitrary sub-page region with the repeated word, honoring the
/// word phase of `offset` so partial reads of a same-filled page see the
/// same bytes a full read would.
pub fn fill_region_word(dst: &mut [u8], offset: usize, value: u64) {
    let bytes = value.to_ne_bytes();
    for (i, b) in dst.iter_mut().enumerate() {
        *b = bytes[(offset + i) % 8];
    }
}
