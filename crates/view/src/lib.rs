use std::fmt;

use grid::{PixelOffset, PixelSize};

/// Zoom multiplier applied per scroll line: `1 - delta * SCROLL_ZOOM_SENSITIVITY`.
pub const SCROLL_ZOOM_SENSITIVITY: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportError {
    InvalidZoom,
    InvalidTileSize,
    NonFiniteValue,
}

impl fmt::Display for ViewportError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewportError::InvalidZoom => write!(formatter, "zoom factor must be positive"),
            ViewportError::InvalidTileSize => {
                write!(formatter, "tile size must be positive and finite")
            }
            ViewportError::NonFiniteValue => {
                write!(formatter, "viewport arithmetic produced a non-finite value")
            }
        }
    }
}

impl std::error::Error for ViewportError {}

/// Pan offset, zoom factor, and the derived tile pixel size. The tile size
/// is always `base_tile_size * zoom` and is recomputed whenever the zoom
/// factor changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pan: PixelOffset,
    zoom: f32,
    base_tile_size: PixelSize,
    tile_size: PixelSize,
}

impl ViewportState {
    pub fn new(base_tile_size: PixelSize) -> Result<Self, ViewportError> {
        if !base_tile_size.width.is_finite()
            || !base_tile_size.height.is_finite()
            || base_tile_size.width <= 0.0
            || base_tile_size.height <= 0.0
        {
            return Err(ViewportError::InvalidTileSize);
        }
        Ok(Self {
            pan: PixelOffset::ZERO,
            zoom: 1.0,
            base_tile_size,
            tile_size: base_tile_size,
        })
    }

    pub fn pan_offset(&self) -> PixelOffset {
        self.pan
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn base_tile_size(&self) -> PixelSize {
        self.base_tile_size
    }

    pub fn tile_size(&self) -> PixelSize {
        self.tile_size
    }

    pub fn pan_by(&mut self, delta_x: f32, delta_y: f32) -> Result<(), ViewportError> {
        let next_x = checked_add(self.pan.x, delta_x)?;
        let next_y = checked_add(self.pan.y, delta_y)?;
        self.pan = PixelOffset {
            x: next_x,
            y: next_y,
        };
        Ok(())
    }

    /// Multiplies the zoom factor and re-anchors the pan offset so the
    /// content point under `point` stays fixed on screen:
    /// `pan = (pan + point) * multiplier - point`. A multiplier that would
    /// drive the zoom to zero or below is rejected with the state unchanged.
    pub fn zoom_about_point(
        &mut self,
        zoom_multiplier: f32,
        point: PixelOffset,
    ) -> Result<(), ViewportError> {
        if !zoom_multiplier.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }

        let next_zoom = checked_mul(self.zoom, zoom_multiplier)?;
        if next_zoom <= 0.0 {
            return Err(ViewportError::InvalidZoom);
        }

        let anchored_x = checked_mul(checked_add(self.pan.x, point.x)?, zoom_multiplier)?;
        let anchored_y = checked_mul(checked_add(self.pan.y, point.y)?, zoom_multiplier)?;
        let next_pan_x = checked_add(anchored_x, -point.x)?;
        let next_pan_y = checked_add(anchored_y, -point.y)?;

        self.pan = PixelOffset {
            x: next_pan_x,
            y: next_pan_y,
        };
        self.zoom = next_zoom;
        self.tile_size = PixelSize {
            width: self.base_tile_size.width * next_zoom,
            height: self.base_tile_size.height * next_zoom,
        };
        Ok(())
    }
}

/// Interprets pointer events against the owned [`ViewportState`]:
/// drag-to-pan while the pointer is pressed, scroll-to-zoom anchored at
/// the pointer position.
#[derive(Debug)]
pub struct ViewportController {
    state: ViewportState,
    pointer_position: PixelOffset,
    drag_anchor: Option<PixelOffset>,
}

impl ViewportController {
    pub fn new(base_tile_size: PixelSize) -> Result<Self, ViewportError> {
        Ok(Self {
            state: ViewportState::new(base_tile_size)?,
            pointer_position: PixelOffset::ZERO,
            drag_anchor: None,
        })
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn pointer_position(&self) -> PixelOffset {
        self.pointer_position
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn pointer_pressed(&mut self) {
        self.drag_anchor = Some(self.pointer_position);
    }

    /// While pressed, pans 1:1 with pointer movement and re-anchors at the
    /// new pointer position.
    pub fn pointer_moved(&mut self, position: PixelOffset) -> Result<(), ViewportError> {
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        self.pointer_position = position;
        if let Some(anchor) = self.drag_anchor {
            self.state
                .pan_by(anchor.x - position.x, anchor.y - position.y)?;
            self.drag_anchor = Some(position);
        }
        Ok(())
    }

    pub fn pointer_released(&mut self) {
        self.drag_anchor = None;
    }

    /// Returns `true` when the zoom update was applied, `false` when it was
    /// rejected because the resulting zoom would be non-positive. Callers
    /// needing a zoom floor or ceiling must supply one externally.
    pub fn scrolled(&mut self, scroll_delta: f32) -> Result<bool, ViewportError> {
        if !scroll_delta.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        let zoom_multiplier = 1.0 - scroll_delta * SCROLL_ZOOM_SENSITIVITY;
        match self
            .state
            .zoom_about_point(zoom_multiplier, self.pointer_position)
        {
            Ok(()) => Ok(true),
            Err(ViewportError::InvalidZoom) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

fn checked_add(current: f32, delta: f32) -> Result<f32, ViewportError> {
    if !delta.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    let next = current + delta;
    if !next.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_mul(left: f32, right: f32) -> Result<f32, ViewportError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    Ok(next)
}
