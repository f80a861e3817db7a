//! Data models shared by providers, the cache layer and callers.

mod news;
mod quote;
mod request;

pub use news::NewsArticle;
pub use quote::Quote;
pub use request::{Endpoint, ProviderRequest, ProviderResponse};
