//! The address-resolution collaborator (§6).

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::model::IpNet;

pub use crate::model::ip_nets_equal;

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn lookup_ip_nets(&self, address: &str) -> Result<Vec<IpNet>, ResolveError>;
}

/// A resolver driven by a fixed table, for tests and the demo binary.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: std::collections::HashMap<String, Vec<IpNet>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, address: impl Into<String>, nets: Vec<IpNet>) {
        self.table.insert(address.into(), nets);
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn lookup_ip_nets(&self, address: &str) -> Result<Vec<IpNet>, ResolveError> {
        self.table
            .get(address)
            .cloned()
            .ok_or_else(|| ResolveError::Failed(format!("no route to {address}")))
    }
}
