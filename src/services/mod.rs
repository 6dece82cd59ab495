pub mod forwarder;
pub mod geoip;

pub use forwarder::{ForwardError, Forwarder, HttpForwarder, ProxyRequest, ProxyResponse};
pub use geoip::{DatasetLoader, Location, RangeTable, Resolver};
