#![forbid(unsafe_code)]
//! The public entry point: `create_client` composes Transport, Cache,
//! Coalescer and Modifier inside-out into the single `Client` applications
//! use, and `standard_cache_location` resolves a per-platform cache
//! directory the way the CLI and any default-constructed client use.

mod coalescer;
mod modifier;

pub use coalescer::Coalescer;
pub use modifier::{
    identity_request_modifier, identity_response_modifier, Modifier, RequestDone, RequestModifierFn,
    ResponseDone, ResponseModifierFn,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nfhttp_cache::{CacheOptions, CacheStore, HttpCache};
use nfhttp_transport::{Transport, TransportConfig};
use nfhttp_types::{Client, NfError, Result};

/// Builds the full pipeline: `Modifier(Coalescer(HttpCache(Transport)))`.
/// `request_modifier`/`response_modifier` default to identity when `None`,
/// which makes the Modifier layer a harmless passthrough.
pub fn create_client(
    cache_dir: impl AsRef<Path>,
    user_agent: impl Into<String>,
    request_modifier: Option<RequestModifierFn>,
    response_modifier: Option<ResponseModifierFn>,
) -> Result<Arc<dyn Client>> {
    let cache_dir = cache_dir.as_ref();
    tracing::debug!(cache_dir = %cache_dir.display(), "building client pipeline");
    let mut transport_config = TransportConfig::default();
    transport_config.user_agent = Some(user_agent.into());
    let transport: Arc<dyn Client> = Arc::new(Transport::new(transport_config));

    let store = Arc::new(CacheStore::open(cache_dir)?);
    let cache: Arc<dyn Client> = Arc::new(HttpCache::new(transport, store, CacheOptions::default()));

    let coalescer: Arc<dyn Client> = Arc::new(Coalescer::new(cache));

    let modifier = Modifier::new(
        coalescer,
        request_modifier.unwrap_or_else(identity_request_modifier),
        response_modifier.unwrap_or_else(identity_response_modifier),
    );
    Ok(Arc::new(modifier))
}

/// Resolves (and creates) the per-platform user cache directory for
/// nfhttp, matching the external interface's `standardCacheLocation()`.
pub fn standard_cache_location() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .ok_or_else(|| NfError::Storage("no platform cache directory available".into()))?;
    let path = base.join("nfhttp");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}
