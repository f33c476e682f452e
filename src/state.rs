use std::sync::Arc;

use crate::services::price_proxy_service::PriceProxyService;

#[derive(Clone)]
pub struct AppState {
    pub prices: Arc<PriceProxyService>,
}

impl AppState {
    pub fn new(prices: PriceProxyService) -> Self {
        Self {
            prices: Arc::new(prices),
        }
    }
}
