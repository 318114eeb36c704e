use std::sync::Arc;

use crate::{services::CosService, store::local::LocalObjectStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: CosService,
    /// Present when objects are kept on local disk and served by this process.
    pub local: Option<Arc<LocalObjectStore>>,
}
