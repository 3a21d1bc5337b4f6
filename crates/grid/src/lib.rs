/// Logical grid cell address in the unbounded tile lattice. Stable across
/// zoom changes; used as the key for identity assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    pub column: i32,
    pub row: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelOffset {
    pub x: f32,
    pub y: f32,
}

impl PixelOffset {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSize {
    pub width: f32,
    pub height: f32,
}

/// The set of tile indices a viewport rectangle touches: a top-left index
/// plus a column/row count. Row-major iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub top_left: TileIndex,
    pub column_count: u32,
    pub row_count: u32,
}

impl VisibleRange {
    pub fn tile_count(&self) -> usize {
        self.column_count as usize * self.row_count as usize
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        let column_offset = index.column.wrapping_sub(self.top_left.column);
        let row_offset = index.row.wrapping_sub(self.top_left.row);
        column_offset >= 0
            && (column_offset as u32) < self.column_count
            && row_offset >= 0
            && (row_offset as u32) < self.row_count
    }

    pub fn iter(&self) -> impl Iterator<Item = TileIndex> + '_ {
        let top_left = self.top_left;
        let column_count = self.column_count as i32;
        (0..self.row_count as i32).flat_map(move |row_offset| {
            (0..column_count).map(move |column_offset| TileIndex {
                column: top_left.column + column_offset,
                row: top_left.row + row_offset,
            })
        })
    }
}

/// Maps a continuous pixel offset to the index of the tile containing it.
/// `tile_size` must be strictly positive; a degenerate tile size is a
/// caller bug, not a runtime condition this function recovers from.
pub fn tile_index_at(offset: PixelOffset, tile_size: PixelSize) -> TileIndex {
    TileIndex {
        column: tile_axis_index(offset.x, tile_size.width),
        row: tile_axis_index(offset.y, tile_size.height),
    }
}

fn tile_axis_index(value: f32, tile_extent: f32) -> i32 {
    let index = (value / tile_extent).floor();
    if index < i32::MIN as f32 || index > i32::MAX as f32 {
        panic!("tile index out of i32 range");
    }
    index as i32
}

/// The `+ 1` on each axis guarantees full viewport coverage for any
/// fractional pan remainder.
pub fn visible_range(
    viewport_size: PixelSize,
    pan_offset: PixelOffset,
    tile_size: PixelSize,
) -> VisibleRange {
    let column_count = (viewport_size.width / tile_size.width).ceil() as u32 + 1;
    let row_count = (viewport_size.height / tile_size.height).ceil() as u32 + 1;
    VisibleRange {
        top_left: tile_index_at(pan_offset, tile_size),
        column_count,
        row_count,
    }
}

/// Screen position for `index`: index-relative placement corrected by the
/// sub-tile pan remainder, so the top-left tile starts at or left of the
/// viewport origin.
pub fn placement_of(
    index: TileIndex,
    top_left: TileIndex,
    tile_size: PixelSize,
    pan_offset: PixelOffset,
) -> PixelOffset {
    let start_x = top_left.column as f32 * tile_size.width - pan_offset.x;
    let start_y = top_left.row as f32 * tile_size.height - pan_offset.y;
    PixelOffset {
        x: start_x + index.column.wrapping_sub(top_left.column) as f32 * tile_size.width,
        y: start_y + index.row.wrapping_sub(top_left.row) as f32 * tile_size.height,
    }
}
