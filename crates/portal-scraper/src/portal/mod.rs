pub mod error;
pub mod extractor;
pub mod html;
pub mod session;

pub use error::PortalError;
pub use extractor::{default_extractors, CategoryExtractor, PageExtractor};
pub use session::{HttpPortal, Page, PortalConnector, PortalSession};
