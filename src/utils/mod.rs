pub mod ip;

pub use ip::{extract_client_ip, is_trusted_proxy, strip_port};
