pub mod proxy;

pub use proxy::ProxyService;
