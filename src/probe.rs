use derive_more::Display;

/// Target for machine-readable probe events emitted over tracing.
pub const TARGET: &str = "relay_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relayer changes, like starting or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Relayer sync state for an event stream.
    #[display(fmt = "sync")]
    Sync,
    /// The ledger subscription dropped and is being re-established.
    #[display(fmt = "reconnect")]
    Reconnect,
    /// A ledger event was forwarded to the marketplace service.
    #[display(fmt = "order_submission")]
    OrderSubmission,
    /// A reconciliation pass against the marketplace service.
    #[display(fmt = "reconcile")]
    Reconcile,
    /// Relaying a transaction onto the ledger.
    #[display(fmt = "relay_tx")]
    RelayTx,
}
