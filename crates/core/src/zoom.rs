//! Scale and pan state for pinch, double-tap and programmatic zoom.
//!
//! Zoom is a view transform over the laid-out content: it never changes the
//! resolution pages are rendered at.

/// Scale changes smaller than this are ignored.
pub const SCALE_EPSILON: f32 = 0.001;
/// Pinch gestures ending this close to 1.0 snap back to it.
pub const SNAP_EPSILON: f32 = 0.05;
pub const DOUBLE_TAP_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleState {
    scale: f32,
    min_scale: f32,
    max_scale: f32,
    pan: Point,
    focus: Point,
    viewport: (f32, f32),
    pinch_start: Option<f32>,
}

impl ScaleState {
    pub fn new(min_scale: f32, max_scale: f32) -> Self {
        let min_scale = min_scale.max(f32::EPSILON);
        Self {
            scale: 1.0f32.clamp(min_scale, max_scale.max(min_scale)),
            min_scale,
            max_scale: max_scale.max(min_scale),
            pan: Point::default(),
            focus: Point::default(),
            viewport: (crate::layout::DEFAULT_VIEW_WIDTH, crate::layout::DEFAULT_VIEW_HEIGHT),
            pinch_start: None,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min_scale, self.max_scale)
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn focus(&self) -> Point {
        self.focus
    }

    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.scale;
        }
        value.clamp(self.min_scale, self.max_scale)
    }

    /// Clamp and apply `value`. Returns the new scale, or `None` when the
    /// clamped value is within [`SCALE_EPSILON`] of the current one.
    pub fn set_scale(&mut self, value: f32) -> Option<f32> {
        let clamped = self.clamp(value);
        if (clamped - self.scale).abs() < SCALE_EPSILON {
            return None;
        }
        self.scale = clamped;
        self.pan = self.clamp_pan(self.pan);
        Some(clamped)
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width.max(1.0), height.max(1.0));
        self.pan = self.clamp_pan(self.pan);
    }

    /// Largest pan distance on each axis, `(scaled content - viewport) / 2`.
    pub fn pan_bounds(&self) -> Point {
        if self.scale <= 1.0 {
            return Point::default();
        }
        let (width, height) = self.viewport;
        Point::new(width * (self.scale - 1.0) / 2.0, height * (self.scale - 1.0) / 2.0)
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) -> Point {
        self.pan = self.clamp_pan(Point::new(self.pan.x + dx, self.pan.y + dy));
        self.pan
    }

    pub fn reset_pan(&mut self) {
        self.pan = Point::default();
    }

    pub fn pinch_begin(&mut self, focus: Point) {
        self.pinch_start = Some(self.scale);
        self.focus = focus;
    }

    /// `factor` is relative to the scale when the pinch began.
    pub fn pinch_update(&mut self, factor: f32, focus: Point) -> Option<f32> {
        let start = *self.pinch_start.get_or_insert(self.scale);
        let previous = self.scale;
        let changed = self.set_scale(start * factor)?;

        // Keep the content point under the focus fixed while scaling.
        let (width, height) = self.viewport;
        let ratio = changed / previous;
        let fx = focus.x - width / 2.0;
        let fy = focus.y - height / 2.0;
        self.pan = self.clamp_pan(Point::new(
            fx - (fx - self.pan.x) * ratio,
            fy - (fy - self.pan.y) * ratio,
        ));
        self.focus = focus;
        Some(changed)
    }

    /// Finish a pinch. Returns the new scale if snapping changed it.
    pub fn pinch_end(&mut self) -> Option<f32> {
        self.pinch_start = None;
        if (self.scale - 1.0).abs() < SNAP_EPSILON && self.min_scale <= 1.0 {
            let snapped = self.set_scale(1.0);
            self.reset_pan();
            return snapped;
        }
        None
    }

    /// Toggle between 1.0 and 2.0, centering the tapped point when zooming in.
    pub fn double_tap(&mut self, point: Point) -> Option<f32> {
        let target = if (self.scale - 1.0).abs() < SCALE_EPSILON { DOUBLE_TAP_SCALE } else { 1.0 };
        let changed = self.set_scale(target)?;

        if changed > 1.0 {
            let (width, height) = self.viewport;
            let dx = (width / 2.0 - point.x) * changed;
            let dy = (height / 2.0 - point.y) * changed;
            self.pan = self.clamp_pan(Point::new(dx, dy));
        } else {
            self.reset_pan();
        }
        self.focus = point;
        Some(changed)
    }

    fn clamp_pan(&self, pan: Point) -> Point {
        let bounds = self.pan_bounds();
        Point::new(pan.x.clamp(-bounds.x, bounds.x), pan.y.clamp(-bounds.y, bounds.y))
    }
}
