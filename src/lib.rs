//! Xray configuration generation from proxy subscriptions.
//!
//! Link mode turns a subscription dump into a complete config; augmentation
//! mode rebuilds inbounds and routing around an existing config's outbounds.
//! Link decoding itself lives in the `subxray-links` crate.

pub mod compose;
pub mod config;
pub mod error;
pub mod logging;
pub mod outbound;
pub mod routing;

pub use compose::{
    compose_from_links, compose_from_source, write_document, ConfigDocument, LinkComposition,
};
pub use config::{BypassLists, GatewaySettings, Settings};
pub use error::ComposeError;
pub use outbound::{synthesize_links, Batch, OutboundEntry, SkippedLink};
pub use routing::compose_routing;
