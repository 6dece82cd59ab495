//! Lookup mode
//!
//! Loads the configured dataset and prints the location of each address.

use anyhow::Result;

use crate::config::get_config;
use crate::runtime::lifetime::startup::load_resolver;
use crate::services::{Location, Resolver};

/// 单个地址的文本输出
pub fn format_location(address: &str, location: Option<&Location>) -> String {
    match location {
        Some(loc) => format!(
            "{}\t{}, {}, {}, {} ({:.4}, {:.4})",
            address, loc.city, loc.region, loc.country, loc.continent, loc.latitude, loc.longitude
        ),
        None => format!("{}\tunknown", address),
    }
}

/// 单个地址的 JSON 输出
pub fn format_location_json(address: &str, location: Option<&Location>) -> String {
    serde_json::json!({
        "ip": address,
        "found": location.is_some(),
        "location": location,
    })
    .to_string()
}

pub fn render(resolver: &Resolver, addresses: &[String], json: bool) -> Vec<String> {
    addresses
        .iter()
        .map(|address| {
            let location = resolver.resolve(address);
            if json {
                format_location_json(address, location)
            } else {
                format_location(address, location)
            }
        })
        .collect()
}

pub async fn run_lookup(addresses: &[String], json: bool) -> Result<()> {
    let config = get_config();
    let resolver = load_resolver(&config.geoip).await?;

    for line in render(&resolver, addresses, json) {
        println!("{}", line);
    }
    Ok(())
}
