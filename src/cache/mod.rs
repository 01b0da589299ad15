pub mod response;

pub use response::{CachedRender, ResponseCache};
