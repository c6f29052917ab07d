pub mod multipart;
pub mod session;

pub use session::{SessionEnd, SessionState, StreamSession};
