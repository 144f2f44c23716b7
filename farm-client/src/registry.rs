//! The fixed set of build-farm servers a dashboard session can talk to.
//!
//! Order matters: indices into the registry are what the session persists as
//! the active server, and "first valid server" is decided in registry order.

use indexmap::IndexMap;
use session::ServerToken;
use thiserror::Error;
use url::Url;

use crate::config::ServerConfig;

const BUILTIN_SERVERS: &[(&str, &str, &str, bool)] = &[
    (
        "Zen4",
        "https://zen4.builds.buildfarm.local",
        "Packages optimised for x86-64-v4 / Zen 4",
        true,
    ),
    (
        "Standard",
        "https://builds.buildfarm.local",
        "Generic x86-64 packages",
        false,
    ),
];

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("no servers configured")]
    Empty,

    #[error("empty server name")]
    EmptyName,

    #[error("duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("exactly one server must be the default, found {0}")]
    DefaultCount(usize),

    #[error("invalid url for server {0}")]
    InvalidUrl(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerDescriptor {
    pub name: String,
    pub url: Url,
    pub description: String,
    pub is_default: bool,
}

impl ServerDescriptor {
    /// Credential slot for this server with no token.
    pub fn empty_token(&self) -> ServerToken {
        ServerToken {
            name: self.name.clone(),
            description: self.description.clone(),
            url: self.url.to_string(),
            ..Default::default()
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }
}

impl From<ServerConfig> for ServerDescriptor {
    fn from(config: ServerConfig) -> Self {
        Self {
            name: config.name,
            url: config.url,
            description: config.description,
            is_default: config.default,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerRegistry {
    /// Map of server name to descriptor, preserving configured order
    servers: IndexMap<String, ServerDescriptor>,
    default_index: usize,
}

impl ServerRegistry {
    pub fn new(configs: Vec<ServerConfig>) -> Result<Self, RegistryError> {
        Self::from_descriptors(configs.into_iter().map(ServerDescriptor::from).collect())
    }

    /// The compiled-in server list.
    pub fn builtin() -> Result<Self, RegistryError> {
        let descriptors = BUILTIN_SERVERS
            .iter()
            .map(|(name, url, description, is_default)| {
                let url = Url::parse(url).map_err(|_| RegistryError::InvalidUrl(name.to_string()))?;
                Ok(ServerDescriptor {
                    name: name.to_string(),
                    url,
                    description: description.to_string(),
                    is_default: *is_default,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        Self::from_descriptors(descriptors)
    }

    fn from_descriptors(descriptors: Vec<ServerDescriptor>) -> Result<Self, RegistryError> {
        if descriptors.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut servers = IndexMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if servers.contains_key(&descriptor.name) {
                return Err(RegistryError::DuplicateServer(descriptor.name));
            }
            servers.insert(descriptor.name.clone(), descriptor);
        }

        let defaults: Vec<usize> = servers
            .values()
            .enumerate()
            .filter(|(_, s)| s.is_default)
            .map(|(i, _)| i)
            .collect();
        let [default_index] = defaults.as_slice() else {
            return Err(RegistryError::DefaultCount(defaults.len()));
        };

        Ok(Self {
            default_index: *default_index,
            servers,
        })
    }

    /// Servers in registry order.
    pub fn list(&self) -> impl ExactSizeIterator<Item = &ServerDescriptor> {
        self.servers.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.servers.get_index_of(name)
    }

    pub fn get(&self, index: usize) -> Option<&ServerDescriptor> {
        self.servers.get_index(index).map(|(_, server)| server)
    }

    pub fn by_name(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    pub fn default_server(&self) -> &ServerDescriptor {
        &self.servers[self.default_index]
    }

    pub fn default_index(&self) -> usize {
        self.default_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str, default: bool) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            url: Url::parse(&format!("http://{}.example.com/api/", name.to_lowercase())).unwrap(),
            description: format!("{name} builders"),
            default,
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ServerRegistry::builtin().unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["Zen4", "Standard"]);
        assert_eq!(registry.default_server().name, "Zen4");
        assert_eq!(registry.default_index(), 0);
    }

    #[test]
    fn test_lookup() {
        let registry =
            ServerRegistry::new(vec![server("A", false), server("B", true), server("C", false)])
                .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.index_of("C"), Some(2));
        assert_eq!(registry.index_of("missing"), None);
        assert_eq!(registry.get(1).unwrap().name, "B");
        assert!(registry.get(3).is_none());
        assert_eq!(registry.by_name("A").unwrap().description, "A builders");
        assert_eq!(registry.default_server().name, "B");
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(ServerRegistry::new(vec![]).unwrap_err(), RegistryError::Empty);
        assert_eq!(
            ServerRegistry::new(vec![server("", true)]).unwrap_err(),
            RegistryError::EmptyName
        );
        assert_eq!(
            ServerRegistry::new(vec![server("A", true), server("A", false)]).unwrap_err(),
            RegistryError::DuplicateServer("A".into())
        );
        assert_eq!(
            ServerRegistry::new(vec![server("A", false), server("B", false)]).unwrap_err(),
            RegistryError::DefaultCount(0)
        );
        assert_eq!(
            ServerRegistry::new(vec![server("A", true), server("B", true)]).unwrap_err(),
            RegistryError::DefaultCount(2)
        );
    }

    #[test]
    fn test_descriptor_urls() {
        let registry = ServerRegistry::new(vec![server("A", true)]).unwrap();
        let a = registry.default_server();
        assert_eq!(a.base_url(), "http://a.example.com/api");

        let token = a.empty_token();
        assert_eq!(token.name, "A");
        assert!(!token.is_authenticated());
        assert!(token.scopes.is_empty());
    }
}
