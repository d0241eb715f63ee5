pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod presence;
pub mod rate_limit;
pub mod reactions;
pub mod record;
pub mod retention;
pub mod seen;
pub mod session;
