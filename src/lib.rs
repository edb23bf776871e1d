pub mod promo_engine;
pub mod routes;
