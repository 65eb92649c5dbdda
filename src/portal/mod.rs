//! The portal registry (§4.2): named handles to in-progress query
//! executions, their lifecycle state machine, and the transaction-hook
//! coordination that materializes, fails, or tears them down.

pub mod external;
mod portal;
mod registry;
mod table;
pub mod types;

pub use external::{
    ArenaFactory, HoldPersister, MemoryArena, ReleasePhase, ResourceOwner, ResourceOwnerFactory, TupleStore, TupleStoreFactory,
};
pub use portal::Portal;
pub use registry::{PortalRegistry, PortalSummary};
pub use types::{CursorOptions, PortalStatus, SubTransactionId};
