use pulsear_types::SliceRange;

/// Split `range` into at most `parts` contiguous, near-equal pieces.
///
/// Every piece gets `len / parts` slices and the remainder goes to the last
/// one. Never returns empty pieces; fewer pieces come back when the range is
/// shorter than `parts`.
pub fn partition(range: SliceRange, parts: usize) -> Vec<SliceRange> {
    let len = range.len();
    if len == 0 || parts == 0 {
        return Vec::new();
    }
    let parts = (parts as u32).min(len);
    let step = len / parts;
    (0..parts)
        .map(|i| {
            let start = range.start + i * step;
            let end = if i + 1 == parts { range.end } else { start + step };
            SliceRange::new(start, end)
        })
        .collect()
}
