use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::registry::Registry;
use crate::uploads::UploadStore;
use crate::verify::RecordVerifier;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub verifier: Arc<RecordVerifier>,
    pub uploads: Arc<UploadStore>,
    /// Root cancellation: fired once at shutdown, observed by every
    /// peer-channel task.
    pub cancel: CancellationToken,
}
