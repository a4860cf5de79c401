#![allow(unreachable_pub)]

mod error;
mod request;
mod response;

pub use error::ErrorKind;
pub use request::{Request, RequestOptions};
pub use response::Response;

/// The quotient `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
