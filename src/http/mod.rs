pub mod multipart;
pub mod request;
pub mod response;

pub use multipart::{MultipartParser, MultipartState, UploadedPart};
pub use request::*;
pub use response::*;