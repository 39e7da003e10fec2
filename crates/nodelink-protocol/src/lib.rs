//! # nodelink-protocol
//!
//! Topic protocol spoken between a node and remote tooling over the broker.
//!
//! All topics are local, i.e. relative to the node's base topic:
//!
//! | Topic | Direction | Payload |
//! |-------|-----------|---------|
//! | `nodelink/get/<param>` | in | ignored |
//! | `nodelink/set/<param>` | in | new value |
//! | `nodelink/unset/<param>` | in | ignored |
//! | `nodelink/describe` | in | ignored |
//! | `nodelink/value/<param>` | out | current value |
//! | `nodelink/schema` | out | `name:code` listing |
//! | `nodelink/announcement` | out, retained | JSON [`Announcement`] |
//! | `nodelink/log` | out | device log line |
//! | `nodelink/update/begin` | in | image size |
//! | `nodelink/update/write` | in | image chunk |
//! | `nodelink/update/finish` | in | ignored |
//! | `nodelink/update/request` | out | maximum next chunk size |

pub mod codec;
pub mod messages;

pub use codec::{
    decode_announcement, decode_command, decode_update, encode_announcement, CodecError,
};
pub use messages::*;
