pub mod archive;
pub mod images;
pub mod session;
