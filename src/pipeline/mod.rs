//! Pipeline stages for one recipient's dashboard delivery.
//!
//! Each submodule implements exactly one step, behind a trait where the step
//! talks to the outside world, so the dispatcher can run against scripted
//! stand-ins in tests.
//!
//! ## Data Flow
//!
//! ```text
//! request ──▶ poll ──▶ rasterize ──▶ notify
//! (POST job)  (wait +   (pdfium →     (lettre →
//!              download)  N.jpg)        SMTP)
//! ```
//!
//! 1. [`request`]: submit the render job; [`request::RenderBackend`]
//! 2. [`poll`]: bounded readiness polling, then download to disk
//! 3. [`rasterize`]: one JPEG per page; [`rasterize::PageRasterizer`]
//! 4. [`notify`]: compose and send the message; [`notify::Notifier`]

pub mod notify;
pub mod poll;
pub mod rasterize;
pub mod request;
