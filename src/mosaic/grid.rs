//! Tile grid builder.
//!
//! Partitions the reference image into `⌈W/tw⌉ × ⌈H/th⌉` cells. Cells on the
//! right and bottom edges are clipped to the remaining pixels, so the grid
//! covers the image exactly without overlap.

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info};

use super::codec;
use super::color::dominant_color_of;
use crate::error::{MosaicError, Stage};
use crate::io::ImageFetcher;
use crate::model::{validate_url, Tile};
use crate::store::MosaicStore;

/// Parameters for building a tile grid.
#[derive(Debug, Clone)]
pub struct GridRequest {
    pub main_image_url: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub mosaic_key: String,
    /// Delete the existing tiles for the key before inserting
    pub overwrite: bool,
}

/// Shape of a built grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSummary {
    pub rows: u32,
    pub cols: u32,
    pub count: usize,
}

/// Pixel rectangle of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub row: u32,
    pub col: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Number of `(rows, cols)` for an image and tile size.
pub fn grid_shape(width: u32, height: u32, tile_width: u32, tile_height: u32) -> (u32, u32) {
    (height.div_ceil(tile_height), width.div_ceil(tile_width))
}

/// Cell rectangles in row-major order.
///
/// `tile_width` and `tile_height` must be non-zero.
pub fn tile_rects(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<TileRect> {
    let (rows, cols) = grid_shape(width, height, tile_width, tile_height);
    let mut rects = Vec::with_capacity((rows * cols) as usize);

    for row in 0..rows {
        for col in 0..cols {
            let left = col * tile_width;
            let top = row * tile_height;
            rects.push(TileRect {
                row,
                col,
                left,
                top,
                width: tile_width.min(width - left),
                height: tile_height.min(height - top),
            });
        }
    }

    rects
}

/// Cut a decoded image into tiles and compute each tile's dominant color.
pub fn build_tiles(
    image: &DynamicImage,
    mosaic_key: &str,
    tile_width: u32,
    tile_height: u32,
) -> Vec<Tile> {
    tile_rects(image.width(), image.height(), tile_width, tile_height)
        .into_iter()
        .map(|rect| {
            let region = image.crop_imm(rect.left, rect.top, rect.width, rect.height);
            Tile {
                id: 0,
                mosaic_key: mosaic_key.to_string(),
                row: rect.row,
                col: rect.col,
                left: rect.left,
                top: rect.top,
                width: rect.width,
                height: rect.height,
                color: dominant_color_of(&region),
                matched_photo: None,
                matched_url: String::new(),
            }
        })
        .collect()
}

fn validate(request: &GridRequest) -> Result<(), MosaicError> {
    if request.main_image_url.trim().is_empty() {
        return Err(MosaicError::InvalidInput(
            "mainImageUrl is required".to_string(),
        ));
    }
    validate_url(&request.main_image_url)?;

    if request.tile_width == 0 || request.tile_height == 0 {
        return Err(MosaicError::InvalidInput(format!(
            "tile dimensions must be positive, got {}x{}",
            request.tile_width, request.tile_height
        )));
    }

    Ok(())
}

/// Fetch the reference image and persist a fresh grid for the key.
///
/// The old grid is only removed once the new image decoded successfully, so
/// an unreachable reference image leaves the previous tiles untouched.
pub async fn build_grid(
    store: &dyn MosaicStore,
    fetcher: &dyn ImageFetcher,
    request: &GridRequest,
) -> Result<GridSummary, MosaicError> {
    validate(request)?;

    let key = request.mosaic_key.as_str();
    let bytes = fetcher
        .get(&request.main_image_url)
        .await
        .map_err(|e| MosaicError::upstream(Stage::Grid, key, e))?;

    let (tile_width, tile_height) = (request.tile_width, request.tile_height);
    let owned_key = key.to_string();
    let (width, height, tiles) = tokio::task::spawn_blocking(move || {
        let image = codec::decode(&bytes).map_err(|e| {
            MosaicError::InvalidInput(format!("could not read main image dimensions: {}", e))
        })?;
        if image.width() == 0 || image.height() == 0 {
            return Err(MosaicError::InvalidInput(
                "main image has no pixels".to_string(),
            ));
        }
        let tiles = build_tiles(&image, &owned_key, tile_width, tile_height);
        Ok::<_, MosaicError>((image.width(), image.height(), tiles))
    })
    .await
    .map_err(MosaicError::image)??;

    let (rows, cols) = grid_shape(width, height, tile_width, tile_height);

    if request.overwrite {
        let removed = store.delete_tiles(key).await?;
        debug!(mosaic_key = key, removed, "Cleared previous grid");
    }

    let count = store.insert_tiles(tiles).await?;

    info!(
        mosaic_key = key,
        rows,
        cols,
        count,
        width,
        height,
        "Built tile grid"
    );

    Ok(GridSummary { rows, cols, count })
}
