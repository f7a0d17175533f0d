//! Shadow controller store client
//!
//! Read/write access to the two object kinds the Shadow controller touches:
//! `Shadow` (declared state) and `Pod` (managed state), plus diagnostic event
//! recording against a `Shadow`.
//!
//! Reads are served from `kube_runtime::reflector` caches kept current by the
//! controller's watch tasks; writes go straight to the API server through
//! `kube::Api`. The traits in [`store_trait`] and [`events`] are the seams the
//! reconciler depends on, so tests can swap in the in-memory [`mock`] stores.
//!
//! # Example
//!
//! ```no_run
//! use crds::Shadow;
//! use kube::Client;
//! use kube_runtime::reflector;
//! use shadow_client::{DeclaredStore, KubeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_default().await?;
//! let (reader, _writer) = reflector::store::<Shadow>();
//! let shadows = KubeStore::new(client, reader);
//!
//! if let Some(shadow) = DeclaredStore::get(&shadows, "default", "a").await? {
//!     println!("Shadow a wants pod {}", shadow.spec.pod_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod events;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use events::{EventRecorder, EventType, KubeEventRecorder};
pub use store_trait::{DeclaredStore, ManagedStore};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEventRecorder, MockStore, RecordedEvent, WriteOp};
