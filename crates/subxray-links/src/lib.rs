//! Subscription link handling for subxray.
//!
//! Pulls proxy URIs out of free-form subscription text and decodes each one
//! into a scheme-agnostic [`NodeDescriptor`]. Transport query parameters are
//! normalized into a [`TransportDescriptor`] shared by every scheme.

pub mod b64;
pub mod decode;
pub mod error;
pub mod extract;
pub mod node;
pub mod transport;

pub use decode::decode_link;
pub use error::LinkError;
pub use extract::{extract_links, find_links, unescape_html};
pub use node::{Credential, NodeDescriptor, NodeKind, Scheme};
pub use transport::{
    normalize_transport, GrpcSettings, Network, RealitySettings, Security, TlsSettings,
    TransportDescriptor, WsSettings,
};
