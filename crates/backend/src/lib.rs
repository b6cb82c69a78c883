pub mod cache;
pub mod context;
pub mod fetcher;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod watcher;

pub use cache::RecencyCache;
pub use context::SessionContext;
pub use fetcher::{CombinedFetcher, CombinedPage, FetchTarget, OVERFETCH};
pub use registry::{ContextRegistry, RegistryError, SwitchResult};
pub use scanner::LocalScanner;
pub use service::{BackendService, RemoteTransport};
pub use watcher::{ChangeKind, ContextChange, ContextWatcher, FsWatcher, NoopWatcher};
