pub mod jwt;
pub mod opaque;
