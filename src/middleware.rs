//! Onion-model middleware chain
//!
//! Middlewares wrap `(component, method, args) -> result`. The first
//! registered layer sees the call first and the result last; the core
//! execution (select + execute) is the terminal `next`. A layer may
//! short-circuit by not calling `next`.

use std::sync::Arc;

use crate::error::Result;
use crate::value::{Params, Value};

/// Continuation into the next layer (or the core execution).
pub type Next<'a> = &'a dyn Fn(Params) -> Result<Value>;

/// One interceptor layer.
pub trait Middleware: Send + Sync {
    fn call(&self, component: &str, method: &str, args: Params, next: Next<'_>) -> Result<Value>;
}

/// Closure adapter so plain functions can act as layers.
pub struct FnMiddleware<F>(pub F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&str, &str, Params, Next<'_>) -> Result<Value> + Send + Sync,
{
    fn call(&self, component: &str, method: &str, args: Params, next: Next<'_>) -> Result<Value> {
        (self.0)(component, method, args, next)
    }
}

/// Ordered middleware stack; cheap to clone.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> MiddlewareChain {
        MiddlewareChain::default()
    }

    /// Append a layer; earlier layers are outermost.
    pub fn add(&mut self, layer: Arc<dyn Middleware>) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run the call through every layer down to `core`.
    pub fn invoke(
        &self,
        component: &str,
        method: &str,
        args: Params,
        core: &dyn Fn(Params) -> Result<Value>,
    ) -> Result<Value> {
        fn descend(
            layers: &[Arc<dyn Middleware>],
            component: &str,
            method: &str,
            args: Params,
            core: &dyn Fn(Params) -> Result<Value>,
        ) -> Result<Value> {
            match layers.split_first() {
                None => core(args),
                Some((layer, rest)) => {
                    let next = |a: Params| descend(rest, component, method, a, core);
                    layer.call(component, method, args, &next)
                }
            }
        }
        descend(&self.layers, component, method, args, core)
    }
}
