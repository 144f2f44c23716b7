use crate::config::ServerConfig;
use crate::registry::{ServerDescriptor, ServerRegistry};
use url::Url;

pub fn descriptor(name: &str, url: &str, is_default: bool) -> ServerDescriptor {
    ServerDescriptor {
        name: name.to_string(),
        url: Url::parse(url).unwrap(),
        description: format!("{name} builders"),
        is_default,
    }
}

/// Registry over `(name, base url)` pairs; the first entry is the default.
pub fn registry(servers: &[(&str, &str)]) -> ServerRegistry {
    ServerRegistry::new(
        servers
            .iter()
            .enumerate()
            .map(|(i, (name, url))| ServerConfig {
                name: name.to_string(),
                url: Url::parse(url).unwrap(),
                description: format!("{name} builders"),
                default: i == 0,
            })
            .collect(),
    )
    .unwrap()
}
