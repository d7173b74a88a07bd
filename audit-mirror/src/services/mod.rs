pub mod dispatcher;
pub mod projector;
pub mod schema;
