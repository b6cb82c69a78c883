pub mod api;
pub mod context;
pub mod cursor;
pub mod scanner;
pub mod session;
pub mod validate;

pub use api::{
    BackendApi, ConnectionState, ConnectionStatus, RemoteConnectConfig, RemoteConnector,
    ServiceError, SwitchResponse,
};
pub use context::{ContextId, ContextInfo, ContextKind};
pub use cursor::{CompositeCursor, CursorSlot, RecencyCursor};
pub use scanner::{ScanError, SessionScanner};
pub use session::{
    CombinedSessionsResponse, DetailLevel, ProjectSummary, SessionKey, SessionPage,
    SessionSummary,
};
pub use validate::ValidationError;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
