pub mod cursor;
pub mod puller;

pub use cursor::{Cursor, CursorError};
pub use puller::{Puller, PullerError};
