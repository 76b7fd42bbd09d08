//! Building blocks composed by the profile manager.
//!
//! Each module owns one concern and knows nothing about the others beyond
//! the shared profile model.

pub mod events;
pub mod linking;
pub mod observation;
pub mod randomization;
pub mod selection;

// Re-export commonly used types
pub use events::{EventDispatcher, EventHandler, LoggingHandler, ProfileEvent};
pub use linking::{LinkChanges, LinkConfig, LinkGraph};
pub use observation::{Observation, ObservationCache, ObservationCacheConfig};
pub use randomization::{AddressRandomizer, RandomizationPolicy, RandomizedAddressState};
pub use selection::{
    ConnectChoice, DisableReason, DisableReasonInfo, ReasonOverride, ReasonTable, ScanCandidate,
    SelectionState, SelectionStateMachine, SelectionStatus, Transition,
};
