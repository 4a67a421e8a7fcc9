//! Full-duplex byte channel built from two plain HTTP exchanges
//!
//! The client opens two POST requests to `/cli?remoting=false` that share a
//! random `Session` header:
//!
//! - `Side: download`: the response body streams server-to-client bytes
//! - `Side: upload`: the chunked request body streams client-to-server bytes
//!
//! The server parks whichever leg arrives first in a [`SessionRegistry`].
//! When the second leg arrives it writes a single readiness byte
//! ([`READY_MARKER`]) on the download leg and hands both halves to its
//! [`ConnectionHandler`] as one [`DuplexChannel`].

pub mod channel;
pub mod client;
pub mod error;
pub mod registry;
pub mod server;

pub use channel::{BoxReader, BoxWriter, DuplexChannel, LegReader};
pub use client::{TunnelClient, TunnelClientBuilder};
pub use error::{RegistryError, TunnelError};
pub use registry::{
    DownloadLeg, Leg, Offer, PairedLegs, SessionId, SessionRegistry, Side, UploadLeg,
};
pub use server::{ConnectionHandler, TunnelServer, TunnelServerConfig};

use std::time::Duration;

/// First byte of every download leg once both legs are bound
pub const READY_MARKER: u8 = 0x00;

/// How long a half-open session may wait for its other leg
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15);

/// Path of the tunnel endpoint
pub const CLI_PATH: &str = "/cli";

/// Header carrying the session token
pub const SESSION_HEADER: &str = "Session";

/// Header naming the leg ("download" or "upload")
pub const SIDE_HEADER: &str = "Side";
