mod metadata;
mod request;
mod response;

pub use self::metadata::*;
pub use self::request::*;
pub use self::response::*;
