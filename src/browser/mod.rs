pub mod session;
pub mod stealth;

pub use session::{BrowserSession, SessionOptions};
