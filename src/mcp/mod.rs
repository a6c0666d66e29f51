//! MCP aggregating proxy: multiplexes one client session across several
//! downstream MCP servers behind a single, unified capability surface.

pub mod auth;
pub mod capabilities;
pub mod codec;
pub mod logging;
pub mod ratelimit;
pub mod router;
pub mod types;
pub mod upstream;

pub use router::Router;
