//! Per-request context — type-safe state injection and request extensions.
//!
//! Middleware attaches per-request state to the [`Context`] through its
//! [`Extensions`] map. The identity middleware stores the verified
//! [`CallContext`] there; later layers read it back with [`Context::call`].

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::Request;

pub mod call;

pub use call::CallContext;

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the extensions map, replacing any previous value
    /// of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to a value from the extensions map
    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Per-request context handed through the middleware pipeline.
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The call context attached by the identity middleware, if any.
    pub fn call(&self) -> Option<&CallContext> {
        self.extensions.get::<CallContext>()
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.request.body();
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, identity::Identity};

    #[test]
    fn extensions_round_trip() {
        let mut ext = Extensions::new();
        ext.insert(5u32);
        assert_eq!(ext.get::<u32>(), Some(&5));
        *ext.get_mut::<u32>().unwrap() += 1;
        assert_eq!(ext.remove::<u32>(), Some(6));
        assert!(ext.get::<u32>().is_none());
    }

    #[test]
    fn call_context_is_read_from_extensions() {
        let mut ctx = Context::new(Request::new(Method::Get, "/"));
        assert!(ctx.call().is_none());
        ctx.extensions_mut()
            .insert(CallContext::authenticated(Identity::new(3, "c@d.e")));
        assert_eq!(ctx.call().and_then(|c| c.identity()).map(|u| u.id), Some(3));
    }

    #[test]
    fn json_body() {
        let ctx = Context::new(Request::new(Method::Post, "/").with_body(r#"{"n":1}"#));
        let v: serde_json::Value = ctx.json().unwrap();
        assert_eq!(v["n"], 1);
    }
}
