//! Device management operation kinds and their request mapping

use std::fmt;

use crate::message::{Method, Request};
use crate::path::ResourcePath;

/// Operations a server can perform against a device's object tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    Execute,
    Observe,
    Create,
    Delete,
}

impl OperationKind {
    /// Request method used to carry this operation
    pub fn method(&self) -> Method {
        match self {
            OperationKind::Read | OperationKind::Observe => Method::Get,
            OperationKind::Write => Method::Put,
            OperationKind::Execute | OperationKind::Create => Method::Post,
            OperationKind::Delete => Method::Delete,
        }
    }

    /// Classify an inbound request addressed at `path`
    ///
    /// POST means Execute on a resource and Create on an object or instance.
    pub fn classify(request: &Request, path: &ResourcePath) -> Self {
        match request.method {
            Method::Get if request.observe => OperationKind::Observe,
            Method::Get => OperationKind::Read,
            Method::Put => OperationKind::Write,
            Method::Post if path.is_resource() => OperationKind::Execute,
            Method::Post => OperationKind::Create,
            Method::Delete => OperationKind::Delete,
        }
    }

    /// Build the request for this operation
    pub fn request(&self, path: &ResourcePath) -> Request {
        let request = Request::new(self.method(), path.to_string());
        match self {
            OperationKind::Observe => request.with_observe(),
            _ => request,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Execute => "execute",
            OperationKind::Observe => "observe",
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_roundtrips_through_request() {
        let resource = ResourcePath::resource(3, 0, 4);
        let instance = ResourcePath::instance(3, 0);

        for (kind, path) in [
            (OperationKind::Read, resource),
            (OperationKind::Write, resource),
            (OperationKind::Execute, resource),
            (OperationKind::Observe, resource),
            (OperationKind::Create, instance),
            (OperationKind::Delete, instance),
        ] {
            let request = kind.request(&path);
            assert_eq!(OperationKind::classify(&request, &path), kind);
        }
    }

    #[test]
    fn test_post_on_object_is_create() {
        let path = ResourcePath::object(3);
        let request = Request::new(Method::Post, path.to_string());
        assert_eq!(OperationKind::classify(&request, &path), OperationKind::Create);
    }
}
