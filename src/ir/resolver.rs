//! Parameter scope resolution: an instance's bound parameters shadow the
//! system's global parameters.

use crate::expr::{Expr, ParamResolver, canonical_param_name};
use crate::ir::system::{Instance, System};

pub struct InstanceScope<'a> {
    pub instance: &'a Instance,
    pub system: &'a System,
}

impl<'a> InstanceScope<'a> {
    pub fn new(instance: &'a Instance, system: &'a System) -> Self {
        InstanceScope { instance, system }
    }
}

impl<'a> ParamResolver for InstanceScope<'a> {
    fn resolve(&self, name: &str) -> Option<Expr> {
        let key = canonical_param_name(name);
        if let Some(e) = self.instance.params.get(&key) {
            return Some(e.clone());
        }
        self.system.global_params.get(&key).cloned()
    }
}

pub struct GlobalScope<'a> {
    pub system: &'a System,
}

impl<'a> ParamResolver for GlobalScope<'a> {
    fn resolve(&self, name: &str) -> Option<Expr> {
        let key = canonical_param_name(name);
        if let Some(e) = self.system.global_params.get(&key) {
            return Some(e.clone());
        }
        self.system.resolved_params.get(&key).map(|v| Expr::Lit(*v))
    }
}
