//! Mosaic pipeline.
//!
//! - [`color`]: dominant color extraction
//! - [`grid`]: reference image → tile grid
//! - [`matcher`]: tile → photo assignment
//! - [`render`]: composite, overlay and publish
//! - [`service`]: facade and end-to-end orchestration

pub mod codec;
pub mod color;
pub mod grid;
pub mod matcher;
pub mod render;
pub mod service;

pub use codec::OutputFormat;
pub use color::{dominant_color, extract_colors, FALLBACK_COLOR};
pub use grid::{build_grid, GridRequest, GridSummary};
pub use matcher::{color_distance, match_tiles, MatchPolicy, MatchSummary, PolicyOverrides};
pub use render::{CanvasPlan, Placement, RenderRequest, Renderer};
pub use service::{MosaicService, NewPhoto, ServiceSettings};
