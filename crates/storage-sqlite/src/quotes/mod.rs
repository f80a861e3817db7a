mod model;
mod repository;

pub use model::{QuoteDB, SymbolDB};
pub use repository::QuoteRepository;
