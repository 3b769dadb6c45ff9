//! Continuous vertical page layout.
//!
//! Rows fill the view width minus the horizontal insets; each row's height
//! follows its page's aspect ratio. Offsets are in unscaled view units,
//! measured from the top of the content.

use crate::config::Insets;
use std::ops::RangeInclusive;

pub const DEFAULT_VIEW_WIDTH: f32 = 1080.0;
pub const DEFAULT_VIEW_HEIGHT: f32 = 1920.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub view_width: f32,
    pub view_height: f32,
    pub spacing: f32,
    pub insets: Insets,
    pub page_heights: Vec<f32>,
    pub scroll_offset: f32,
}

impl PageLayout {
    pub fn new(spacing: f32, insets: Insets) -> Self {
        Self {
            view_width: DEFAULT_VIEW_WIDTH,
            view_height: DEFAULT_VIEW_HEIGHT,
            spacing: spacing.max(0.0),
            insets,
            page_heights: Vec::new(),
            scroll_offset: 0.0,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.page_heights.len() as u32
    }

    pub fn row_width(&self) -> f32 {
        (self.view_width - self.insets.left - self.insets.right).max(1.0)
    }

    pub fn row_height(&self, page_index: u32) -> Option<f32> {
        self.page_heights.get(page_index as usize).copied()
    }

    /// Recompute every row height from `aspect(page)` (width / height).
    /// The page at the top edge keeps its position in the viewport.
    pub fn rebuild(&mut self, page_count: u32, aspect: impl Fn(u32) -> f32) {
        let anchor = self.anchor();
        let row_width = self.row_width();
        self.page_heights = (0..page_count)
            .map(|page| {
                let aspect = aspect(page);
                if aspect > 0.0 && aspect.is_finite() {
                    row_width / aspect
                } else {
                    row_width
                }
            })
            .collect();

        let offset = match anchor {
            Some((page, fraction)) if page < self.page_count() => {
                self.page_start_offset(page) + fraction * self.page_heights[page as usize]
            }
            _ => self.scroll_offset,
        };
        self.scroll_offset = self.clamp_scroll(offset);
    }

    /// Top-edge page and how far into its row the viewport starts.
    fn anchor(&self) -> Option<(u32, f32)> {
        if self.page_heights.is_empty() {
            return None;
        }
        let offset = self.scroll_offset.max(0.0);
        let page = self.page_at_offset(offset);
        let height = self.page_heights[page as usize].max(f32::EPSILON);
        let fraction = ((offset - self.page_start_offset(page)) / height).clamp(0.0, 1.0);
        Some((page, fraction))
    }

    pub fn clear(&mut self) {
        self.page_heights.clear();
        self.scroll_offset = 0.0;
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.view_width = width.max(1.0);
        self.view_height = height.max(1.0);
    }

    pub fn content_height(&self) -> f32 {
        if self.page_heights.is_empty() {
            return self.insets.top + self.insets.bottom;
        }
        let rows: f32 = self.page_heights.iter().sum();
        let gaps = self.spacing * (self.page_heights.len() - 1) as f32;
        self.insets.top + rows + gaps + self.insets.bottom
    }

    pub fn page_start_offset(&self, page_index: u32) -> f32 {
        let mut cursor = self.insets.top;
        for (index, height) in self.page_heights.iter().enumerate() {
            if index as u32 == page_index {
                return cursor;
            }
            cursor += height + self.spacing;
        }
        cursor
    }

    /// Page whose row (or the gap above it) contains `offset`.
    pub fn page_at_offset(&self, offset: f32) -> u32 {
        let mut cursor = self.insets.top;
        for (index, height) in self.page_heights.iter().enumerate() {
            let row_end = cursor + height;
            if offset < row_end {
                return index as u32;
            }
            cursor = row_end + self.spacing;
        }
        self.page_count().saturating_sub(1)
    }

    /// The page at the top edge of the viewport.
    pub fn current_page(&self) -> u32 {
        self.page_at_offset(self.scroll_offset.max(0.0))
    }

    /// Pages intersecting the viewport when the content is drawn at `scale`.
    pub fn visible_range(&self, scale: f32) -> Option<RangeInclusive<u32>> {
        if self.page_heights.is_empty() {
            return None;
        }
        let visible_height = self.view_height / scale.max(f32::EPSILON);
        let first = self.page_at_offset(self.scroll_offset.max(0.0));
        let last = self.page_at_offset(self.scroll_offset.max(0.0) + visible_height);
        Some(first..=last.max(first))
    }

    /// The largest scroll offset, still far enough to put the last page's
    /// row at the top of the viewport.
    pub fn max_scroll_offset(&self) -> f32 {
        let bottom = (self.content_height() - self.view_height).max(0.0);
        match self.page_count() {
            0 => bottom,
            count => bottom.max(self.page_start_offset(count - 1)),
        }
    }

    pub fn scroll_to(&mut self, offset: f32) -> f32 {
        self.scroll_offset = self.clamp_scroll(offset);
        self.scroll_offset
    }

    /// Scroll so `page_index` starts at the top of the viewport.
    pub fn scroll_to_page(&mut self, page_index: u32) -> f32 {
        let offset = self.page_start_offset(page_index);
        self.scroll_to(offset)
    }

    fn clamp_scroll(&self, offset: f32) -> f32 {
        if offset.is_finite() {
            offset.clamp(0.0, self.max_scroll_offset())
        } else {
            0.0
        }
    }
}
