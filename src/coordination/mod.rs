// ABOUTME: Remote file coordination core: session lifecycle, path detection,
// cached verified transfer, command translation, and capability probing

pub mod cache;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod probe;
pub mod session;
pub mod transfer;
pub mod translate;

pub use cache::{content_hash, ContentCache};
pub use coordinator::{
    CoordinationOutcome, OutputResolution, RemoteFileCoordinator, SelfTestReport,
};
pub use detector::{DetectedPaths, PathDetector};
pub use error::CoordinationError;
pub use probe::{DisplayStrategy, HostInfo, RemoteCapability, RemoteCapabilityProbe};
pub use session::{Direction, FileMapping, Session, SessionManager};
pub use transfer::{FileTransferManager, OutputFetch};
pub use translate::CommandTranslator;
