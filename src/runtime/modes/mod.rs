//! Mode routing
//!
//! - `server`: the proxy itself
//! - `lookup`: resolve addresses from the command line

pub mod lookup;
pub mod server;

pub use lookup::run_lookup;
pub use server::run_server;
