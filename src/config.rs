//! Server configuration consumed by the dispatch core.

use std::{sync::Arc, time::Duration};

use crate::{invocation::InvocationContext, route::VirtualHost, service::BlockingTaskExecutor};

/// Deadline policy applied to each invocation.
pub trait RequestTimeoutPolicy: Send + Sync {
    /// The deadline for one invocation. `Duration::ZERO` disables it.
    fn timeout(&self, ctx: &InvocationContext) -> Duration;
}

/// The same deadline for every invocation.
pub struct FixedRequestTimeout(Duration);

impl FixedRequestTimeout {
    /// A policy applying `timeout` uniformly; `Duration::ZERO` disables
    /// deadlines entirely.
    #[must_use]
    pub fn new(timeout: Duration) -> Self { Self(timeout) }
}

impl RequestTimeoutPolicy for FixedRequestTimeout {
    fn timeout(&self, _ctx: &InvocationContext) -> Duration { self.0 }
}

/// Immutable configuration shared by every connection of a server.
pub struct ServerConfig {
    virtual_hosts: Vec<VirtualHost>,
    default_host: VirtualHost,
    timeout_policy: Arc<dyn RequestTimeoutPolicy>,
    blocking_executor: BlockingTaskExecutor,
}

impl ServerConfig {
    /// Start building a configuration around the default virtual host.
    #[must_use]
    pub fn builder(default_host: VirtualHost) -> ServerConfigBuilder {
        ServerConfigBuilder {
            virtual_hosts: Vec::new(),
            default_host,
            timeout_policy: Arc::new(FixedRequestTimeout::new(Duration::ZERO)),
            blocking_executor: BlockingTaskExecutor::new(),
        }
    }

    /// The virtual host answering for `hostname`, falling back to the
    /// default host when nothing matches.
    #[must_use]
    pub fn find_virtual_host(&self, hostname: &str) -> &VirtualHost {
        self.virtual_hosts
            .iter()
            .find(|host| host.matches(hostname))
            .unwrap_or(&self.default_host)
    }

    /// The deadline policy applied to invocations.
    #[must_use]
    pub fn request_timeout_policy(&self) -> &Arc<dyn RequestTimeoutPolicy> { &self.timeout_policy }

    /// The executor handlers offload blocking work to.
    #[must_use]
    pub fn blocking_task_executor(&self) -> &BlockingTaskExecutor { &self.blocking_executor }
}

/// Chained builder for [`ServerConfig`].
pub struct ServerConfigBuilder {
    virtual_hosts: Vec<VirtualHost>,
    default_host: VirtualHost,
    timeout_policy: Arc<dyn RequestTimeoutPolicy>,
    blocking_executor: BlockingTaskExecutor,
}

impl ServerConfigBuilder {
    /// Register an additional virtual host.
    ///
    /// Hosts are consulted in registration order; the default host
    /// answers anything left over.
    #[must_use]
    pub fn virtual_host(mut self, host: VirtualHost) -> Self {
        self.virtual_hosts.push(host);
        self
    }

    /// Replace the deadline policy.
    #[must_use]
    pub fn request_timeout_policy(mut self, policy: impl RequestTimeoutPolicy + 'static) -> Self {
        self.timeout_policy = Arc::new(policy);
        self
    }

    /// Apply the same deadline to every request.
    #[must_use]
    pub fn request_timeout(self, timeout: Duration) -> Self {
        self.request_timeout_policy(FixedRequestTimeout::new(timeout))
    }

    /// Replace the blocking-task executor.
    #[must_use]
    pub fn blocking_task_executor(mut self, executor: BlockingTaskExecutor) -> Self {
        self.blocking_executor = executor;
        self
    }

    /// Finish the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            virtual_hosts: self.virtual_hosts,
            default_host: self.default_host,
            timeout_policy: self.timeout_policy,
            blocking_executor: self.blocking_executor,
        }
    }
}
