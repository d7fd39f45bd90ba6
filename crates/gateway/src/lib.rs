//! Chain gateway interface for the HTLC bridge coordinator
//!
//! One [`ChainGateway`] per chain exposes escrow create/withdraw/cancel/observe.
//! The orchestrator depends only on the trait; [`SimulatedChain`] is the
//! in-process driver used by tests and local runs.

pub mod error;
pub mod gateway;
pub mod registry;
pub mod simulated;

pub use error::{ChainOperationError, RevertReason};
pub use gateway::{
    with_timeout, ChainGateway, EscrowEvent, EscrowParams, EscrowReceipt, EscrowRecord,
    EscrowState,
    EventCallback, Subscription,
};
pub use registry::GatewayRegistry;
pub use simulated::{Caller, ChainOp, Fault, SimulatedChain};
