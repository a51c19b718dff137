use polybridge_common::InternalRequest;
use std::fmt;
use std::sync::Arc;

type Matcher = dyn Fn(&InternalRequest) -> bool + Send + Sync;
type Target = dyn Fn(&InternalRequest) -> String + Send + Sync;

/// A named, prioritized content-based routing rule.
///
/// Higher priority rules are evaluated first. When the matcher accepts a
/// request, the target function supplies the service name the request is
/// routed to, overriding the request's own `service` field.
#[derive(Clone)]
pub struct RoutingRule {
    name: String,
    priority: i32,
    matcher: Arc<Matcher>,
    target: Arc<Target>,
}

impl RoutingRule {
    pub fn new<M, T>(name: impl Into<String>, priority: i32, matcher: M, target: T) -> Self
    where
        M: Fn(&InternalRequest) -> bool + Send + Sync + 'static,
        T: Fn(&InternalRequest) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            matcher: Arc::new(matcher),
            target: Arc::new(target),
        }
    }

    /// Routes requests whose `header` equals `value` to `service`.
    pub fn header_equals(
        name: impl Into<String>,
        priority: i32,
        header: impl Into<String>,
        value: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let header = header.into();
        let value = value.into();
        let service = service.into();
        Self::new(
            name,
            priority,
            move |req| req.header(&header) == Some(value.as_str()),
            move |_| service.clone(),
        )
    }

    /// Routes requests whose method starts with `prefix` to `service`.
    pub fn method_prefix(
        name: impl Into<String>,
        priority: i32,
        prefix: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let prefix = prefix.into();
        let service = service.into();
        Self::new(
            name,
            priority,
            move |req| req.method.starts_with(&prefix),
            move |_| service.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn matches(&self, request: &InternalRequest) -> bool {
        (self.matcher)(request)
    }

    pub fn target(&self, request: &InternalRequest) -> String {
        (self.target)(request)
    }
}

impl fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
