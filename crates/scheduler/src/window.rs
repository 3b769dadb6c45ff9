//! Viewport-aware preload window
//!
//! Pages on screen render first at [`JobPriority::Visible`]; pages within the
//! preload radius follow at [`JobPriority::Preload`], nearest first.

use crate::priority::JobPriority;
use std::ops::RangeInclusive;

/// `[first - radius, last + radius]` clipped to the document.
///
/// Returns `None` for an empty document. A reversed visible range is
/// normalized first.
pub fn preload_window(
    first: u32,
    last: u32,
    radius: u32,
    page_count: u32,
) -> Option<RangeInclusive<u32>> {
    if page_count == 0 {
        return None;
    }
    let (first, last) = if first <= last { (first, last) } else { (last, first) };
    let max_index = page_count - 1;

    let start = first.saturating_sub(radius).min(max_index);
    let end = last.saturating_add(radius).min(max_index);
    Some(start..=end)
}

/// Page indices of `window` in render order with their priority: the
/// visible range ascending, then the rest by distance from it.
pub fn render_order(first: u32, last: u32, window: RangeInclusive<u32>) -> Vec<(u32, JobPriority)> {
    let (first, last) = if first <= last { (first, last) } else { (last, first) };

    let mut visible: Vec<(u32, JobPriority)> = Vec::new();
    let mut preload: Vec<(u32, u32)> = Vec::new();

    for page in window {
        if (first..=last).contains(&page) {
            visible.push((page, JobPriority::Visible));
        } else {
            let distance = if page < first { first - page } else { page - last };
            preload.push((distance, page));
        }
    }

    preload.sort_unstable();
    visible.extend(preload.into_iter().map(|(_, page)| (page, JobPriority::Preload)));
    visible
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_in_middle() {
        assert_eq!(preload_window(5, 6, 2, 20), Some(3..=8));
    }

    #[test]
    fn test_window_clipped_at_edges() {
        assert_eq!(preload_window(0, 1, 2, 20), Some(0..=3));
        assert_eq!(preload_window(18, 19, 2, 20), Some(16..=19));
        assert_eq!(preload_window(0, 0, 2, 1), Some(0..=0));
    }

    #[test]
    fn test_window_empty_document() {
        assert_eq!(preload_window(0, 0, 2, 0), None);
    }

    #[test]
    fn test_window_out_of_range_visible_pages() {
        assert_eq!(preload_window(40, 42, 2, 10), Some(9..=9));
    }

    #[test]
    fn test_window_reversed_range() {
        assert_eq!(preload_window(6, 5, 1, 20), Some(4..=7));
    }

    #[test]
    fn test_render_order_visible_first_then_nearest() {
        let order = render_order(5, 6, 3..=8);
        assert_eq!(
            order,
            vec![
                (5, JobPriority::Visible),
                (6, JobPriority::Visible),
                (4, JobPriority::Preload),
                (7, JobPriority::Preload),
                (3, JobPriority::Preload),
                (8, JobPriority::Preload),
            ]
        );
    }
}
