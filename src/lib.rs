pub mod cli;

mod archive;
mod codec;
mod error;
mod logging;
mod manifest;
mod source;
mod vendoring;

pub use codec::Codec;
pub use error::VendorError;
pub use vendoring::VendorLock;
