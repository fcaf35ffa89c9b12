//! Shared state handed to each role's routes.

use std::sync::Arc;

use shopstream_aggregates::{RecommendationReader, RecommendationStore, StatisticsStore};

use crate::auth::JwtService;
use crate::catalog::{ProductCatalog, UserDirectory};

#[derive(Clone)]
pub struct ProductsState {
    pub catalog: Arc<ProductCatalog>,
}

#[derive(Clone)]
pub struct UsersState {
    pub directory: Arc<UserDirectory>,
    pub jwt: JwtService,
}

#[derive(Clone)]
pub struct RecommendationsState {
    pub reader: RecommendationReader,
    pub store: Arc<dyn RecommendationStore>,
}

#[derive(Clone)]
pub struct AnalyticsState {
    pub store: Arc<dyn StatisticsStore>,
}
