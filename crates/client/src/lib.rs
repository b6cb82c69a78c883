pub mod client;
pub mod combined;
pub mod orchestrator;
pub mod preferences;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod workspace;

pub use client::SessionHubClient;
pub use combined::{
    CombinedMode, CombinedSessions, CombinedSessionsState, FetchOutcome, LoadPhase, ToggleError,
};
pub use orchestrator::{ContextSwitcher, CredentialSource, SwitchError, SwitchOutcome};
pub use preferences::PreferenceStore;
pub use snapshot::{SnapshotError, SnapshotStore, WorkspaceSnapshot};
pub use state::{ClientState, ClientStore};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use workspace::{Pane, ReconcileReport, Tab, WorkspaceState};
