pub mod cdn;

pub use cdn::{configure_routes, AppContext};
