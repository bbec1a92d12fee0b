//! Domain layer: harvested records, durable rows, the error taxonomy and the
//! collaborator ports the pipeline depends on.

pub mod error;
pub mod model;
pub mod ports;

pub use error::{FetchError, LookupError, PersistError, RetryClass};
pub use model::{
    Category, EnrichmentPayload, ItemStage, PartId, PriceOption, RatingSummary, RawRecord, Target,
};
pub use ports::{EnrichmentSource, PageSource, RecordExtractor, WaitPolicy};
