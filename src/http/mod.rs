pub mod request;
pub mod response;
pub mod server;

pub use request::Request;
pub use response::{Response, ResponseBody};
pub use server::Server;
