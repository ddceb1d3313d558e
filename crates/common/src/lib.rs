pub mod cameras;
pub mod control_plane;
pub mod source;
