//! Factor snapshots (pivot, pen, zhongshu, anchor) and the pen/anchor
//! render derivation shared by live and replay.

pub mod pen_anchor;
pub mod snapshot;

pub use pen_anchor::*;
pub use snapshot::*;
