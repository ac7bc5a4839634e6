pub mod backend;
pub mod client;
pub mod retry;
pub mod supabase;

pub use backend::{is_transient_status, BackendError, ObjectKey, StorageBackend};
pub use client::{UploadClient, UploadOutcome};
pub use retry::RetryPolicy;
pub use supabase::SupabaseStorage;
