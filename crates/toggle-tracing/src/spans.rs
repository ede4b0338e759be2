//! Span builder helpers for online-toggle instrumentation.

/// Span covering one resolve+apply cycle.
///
/// Usage: `let span = resolve_cycle_span!("scheduled", policy);`
///
/// Fields recorded once the cycle finishes:
/// - `target`: the resolved online-mode
/// - `outcome`: `unchanged`, `changed`, `failed`, or `superseded` when a
///   newer policy change landed while the target was being resolved
#[macro_export]
macro_rules! resolve_cycle_span {
    ($trigger:expr, $policy:expr) => {
        tracing::info_span!(
            "resolve_cycle",
            trigger = %$trigger,
            policy = %$policy,
            target = tracing::field::Empty,
            outcome = tracing::field::Empty,
        )
    };
}

/// Span for a single reachability probe.
#[macro_export]
macro_rules! probe_span {
    ($url:expr) => {
        tracing::debug_span!(
            "status_probe",
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            reachable = tracing::field::Empty,
        )
    };
}

/// Span for a command handled on behalf of a sender.
#[macro_export]
macro_rules! command_span {
    ($command:expr, $sender:expr) => {
        tracing::info_span!(
            "command",
            command = %$command,
            sender = %$sender,
            success = tracing::field::Empty,
        )
    };
}
