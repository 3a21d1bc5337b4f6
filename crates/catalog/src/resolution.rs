/// Picks the load width to request or display for a desired display width.
///
/// Prefers the smallest supported width that is at least `desired`, so a
/// tile never has to upscale; when everything supported is smaller, falls
/// back to the width with the minimum absolute difference. Ties go to the
/// smaller width. Returns `None` for an empty supported set, in which case
/// the caller substitutes a full-tile-sized request.
pub fn select_width(desired: u32, supported: &[u32]) -> Option<u32> {
    closest_bigger(desired, supported).or_else(|| closest(desired, supported))
}

fn closest_bigger(desired: u32, supported: &[u32]) -> Option<u32> {
    supported.iter().copied().filter(|width| *width >= desired).min()
}

fn closest(desired: u32, supported: &[u32]) -> Option<u32> {
    supported
        .iter()
        .copied()
        .min_by_key(|width| (width.abs_diff(desired), *width))
}
