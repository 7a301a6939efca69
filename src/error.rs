//! Errors returned synchronously to the host, as opposed to the failures
//! routed through the event bus's `Status` channel.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendAlertError {
    #[error("alert text must not be empty")]
    EmptyText,
    #[error("engine has stopped accepting sends")]
    EngineStopped,
    #[error("engine is in a fatal transport state")]
    Fatal,
}
