pub mod batch;
pub mod geo;
pub mod record;
pub mod session;

pub use batch::{BatchError, IndexBatch};
pub use geo::{GeoInfo, GeoLookup, GeoResolver};
pub use record::{AccessRecord, RawAccessLine, RecordError};
pub use session::{watch, ParserSession, SessionError};
