//! Tenant path virtualization.
//!
//! Clients address files relative to their tenant (the request hostname);
//! storage sees the virtualized path. The gate is always keyed on the
//! virtualized form so two spellings of the same file share one lock.

use mapstore_core::VirtualPath;

/// A client path resolved for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPath {
    pub tenant: String,
    /// Path as the client sees it (listing cache keys use this form)
    pub rel: VirtualPath,
    /// Path in the backing store
    pub stored: VirtualPath,
}

pub trait PathMapper: Send + Sync {
    /// Storage directory holding everything the tenant owns.
    fn tenant_root(&self, tenant: &str) -> VirtualPath;

    /// Location of the tenant's listing cache artifact.
    fn cache_path(&self, tenant: &str) -> VirtualPath;

    fn resolve(&self, tenant: &str, rel: VirtualPath) -> TenantPath {
        TenantPath {
            tenant: tenant.to_string(),
            stored: self.tenant_root(tenant).join(&rel),
            rel,
        }
    }
}

/// Reduce a Host header value to a single safe path segment:
/// lowercase, port stripped, anything outside `[a-z0-9.-]` replaced.
pub fn tenant_key(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host,
    };
    let key: String = host
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let key = key.trim_start_matches('.');
    if key.is_empty() {
        "default".to_string()
    } else {
        key.to_string()
    }
}

/// Prefixes stored paths with the tenant hostname when enabled, otherwise
/// all tenants share the storage root.
#[derive(Debug, Clone, Default)]
pub struct DomainPathMapper {
    pub use_domain_name_in_path: bool,
}

impl DomainPathMapper {
    pub fn new(use_domain_name_in_path: bool) -> Self {
        Self {
            use_domain_name_in_path,
        }
    }
}

impl PathMapper for DomainPathMapper {
    fn tenant_root(&self, tenant: &str) -> VirtualPath {
        if !self.use_domain_name_in_path {
            return VirtualPath::root();
        }
        VirtualPath::parse(&tenant_key(tenant)).unwrap_or_default()
    }

    fn cache_path(&self, tenant: &str) -> VirtualPath {
        VirtualPath::parse(&format!(".cache/{}.json", tenant_key(tenant))).unwrap_or_default()
    }
}
