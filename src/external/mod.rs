pub mod lme_feed;
pub mod price_source;
pub mod ptax;
