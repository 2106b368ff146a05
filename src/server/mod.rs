//! HTTP admin surface for the mosaic service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /tiles/*   /render   /snapshots/*   /config   /photos         │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error mapping)│  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                         MosaicService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, ConfigResponse, ErrorResponse, HealthResponse};
pub use routes::{create_router, RouterConfig};
