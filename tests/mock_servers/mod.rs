//! Mock servers for integration testing
//!
//! These mock servers simulate the queue authority over HTTP and MPD over TCP,
//! allowing full integration testing without a music box on the network.

#![allow(dead_code)]

pub mod authority;
pub mod mpd;

pub use authority::MockQueueAuthority;
pub use mpd::MockMpd;
