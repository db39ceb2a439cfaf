//! Virtual hosts and the services mapped under them.
//!
//! A [`VirtualHost`] is a routing partition selected by the request's
//! `Host` header; within it, services are matched by path. Routing only
//! ever sees the path with its query string already stripped.

use std::sync::Arc;

use crate::{codec::ServiceCodec, service::ServiceHandler};

/// How a service is mounted under a virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathMapping {
    /// Matches exactly one path.
    Exact(String),
    /// Matches every path under a prefix; the mapped path is the
    /// remainder, rooted at `/`.
    Prefix(String),
    /// Matches everything. The mapped path is the request path.
    CatchAll,
}

impl PathMapping {
    /// The mapped path when `path` matches, `None` otherwise.
    #[must_use]
    pub fn map(&self, path: &str) -> Option<String> {
        match self {
            Self::Exact(exact) => (path == exact).then(|| path.to_string()),
            Self::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if rest.is_empty() {
                    Some(String::from("/"))
                } else if rest.starts_with('/') {
                    Some(rest.to_string())
                } else {
                    None
                }
            }
            Self::CatchAll => Some(path.to_string()),
        }
    }
}

struct ServiceEntry {
    name: String,
    mapping: PathMapping,
    codec: Arc<dyn ServiceCodec>,
    handler: Arc<dyn ServiceHandler>,
}

/// Result of routing a path within a virtual host.
#[derive(Clone)]
pub struct MappedService {
    name: String,
    mapped_path: String,
    codec: Arc<dyn ServiceCodec>,
    handler: Arc<dyn ServiceHandler>,
}

impl MappedService {
    /// Name the service was registered under.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// The request path relative to the service mapping.
    #[must_use]
    pub fn mapped_path(&self) -> &str { &self.mapped_path }

    /// The codec attached to the service.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ServiceCodec> { &self.codec }

    /// The service's handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ServiceHandler> { &self.handler }
}

/// A named routing partition selected by hostname.
pub struct VirtualHost {
    hostname: String,
    services: Vec<ServiceEntry>,
}

impl VirtualHost {
    /// Create a virtual host answering for `hostname`.
    ///
    /// Hostname matching is case-insensitive and exact; the host
    /// registered as the server's default also answers anything that
    /// matches no other host, including an empty hostname.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into().to_ascii_lowercase(),
            services: Vec::new(),
        }
    }

    /// Mount a service under this host.
    #[must_use]
    pub fn service(
        mut self,
        name: impl Into<String>,
        mapping: PathMapping,
        codec: Arc<dyn ServiceCodec>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        self.services.push(ServiceEntry {
            name: name.into(),
            mapping,
            codec,
            handler,
        });
        self
    }

    /// The hostname this host answers for.
    #[must_use]
    pub fn hostname(&self) -> &str { &self.hostname }

    pub(crate) fn matches(&self, hostname: &str) -> bool {
        self.hostname.eq_ignore_ascii_case(hostname)
    }

    /// Route a query-stripped path to a mounted service.
    ///
    /// Services are tried in registration order; the first mapping that
    /// matches wins.
    #[must_use]
    pub fn find_service(&self, path: &str) -> Option<MappedService> {
        self.services.iter().find_map(|entry| {
            entry.mapping.map(path).map(|mapped_path| MappedService {
                name: entry.name.clone(),
                mapped_path,
                codec: Arc::clone(&entry.codec),
                handler: Arc::clone(&entry.handler),
            })
        })
    }
}
