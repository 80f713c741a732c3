//! HTTP API handlers for kotoba-server

pub mod annotations;
pub mod auth;
pub mod books;
pub mod health;
pub mod reading;
pub mod srs;
pub mod words;

pub use annotations::annotation_routes;
pub use auth::{auth_routes, CurrentUser};
pub use books::book_routes;
pub use health::health_routes;
pub use reading::reading_routes;
pub use srs::srs_routes;
pub use words::word_routes;
