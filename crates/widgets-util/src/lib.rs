//! widgets-util - value tree and buffer codec for widget state sync
//!
//! State trees are JSON with two extra leaf kinds: binary buffers, which are
//! split out of the tree before transmission, and opaque references, which
//! are replaced by their plain form on the wire.

pub mod buffers;
pub mod encoding;
pub mod id;
pub mod json_equal;
pub mod value;

// Re-exports for convenience
pub use buffers::{put_buffers, remove_buffers, BufferError, BufferPath, PathStep, SplitBuffers};
pub use encoding::{from_hex, to_hex, BufferEncoding};
pub use id::uuid;
pub use json_equal::{deep_equal, map_equal, option_equal};
pub use value::{Map, NoRef, Reference, Value};
