pub mod browser;
pub mod core;
pub mod engine;
pub mod services;

// --- Primary exports ---
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::AppState;
pub use self::core::{EngineError, EngineResult, RetryPolicy};

// --- Component module shortcuts ---
pub use browser::{BrowserSession, SessionOptions};
pub use engine::{orchestrator, MAX_RETRIES};
pub use services::{resume, solver, vision};
