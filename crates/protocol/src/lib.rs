//! btrfsd Protocol - Shared types for the btrfs service control channel.
//!
//! This crate provides:
//! - [`Request`] and [`Reply`] messages exchanged with the service
//! - [`VolumeEntry`] records and the List reply layout
//! - UTF-16LE helpers in [`wide`]
//! - Endpoint naming via [`default_endpoint`]
//!
//! # Wire Format
//!
//! One request and one reply per connection. Both are `\n`-separated text
//! lines encoded as UTF-16LE. Requests larger than [`MAX_MESSAGE_SIZE`]
//! bytes are dropped without a reply.
//!
//! # Example
//!
//! ```rust
//! use btrfsd_protocol::{Reply, Request, Status};
//!
//! let request = Request::new("List");
//! let bytes = request.encode();
//! assert_eq!(Request::decode(&bytes).unwrap(), request);
//!
//! let reply = Reply::decode(&Reply::bad_message_type().encode()).unwrap();
//! assert_eq!(reply.status(), Some(Status::Error));
//! assert_eq!(reply.to_text(), "Error\nBad message type.");
//! ```

mod endpoint;
mod message;
mod volume;
pub mod wide;

// Re-export main types at crate root
pub use endpoint::{DEFAULT_ENDPOINT, ENDPOINT_ENV_VAR, default_endpoint};
pub use message::{
    BAD_MESSAGE_TYPE, LINE_SEPARATOR, MAX_MESSAGE_SIZE, NO_ENTRIES, ProtocolError, Reply, Request,
    Status,
};
pub use volume::{MountData, MountOptions, VolumeEntry, list_reply, parse_list_reply};

/// Command name that mounts a volume.
pub const MOUNT_COMMAND: &str = "Mount";

/// Command name that lists mounted volumes.
pub const LIST_COMMAND: &str = "List";
