pub mod price_cache;
pub mod price_proxy_service;
