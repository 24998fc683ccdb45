//! Debug Adapter Protocol client core.
//!
//! Message framing, request/response correlation, per-thread session state and
//! a generation-scoped variable tree for front ends that drive a debug adapter.

pub mod client;
pub mod codec;
pub mod config;
mod error;
mod evaluate;
pub mod logging;
mod protocol;
mod session;
mod types;
mod variables;

#[cfg(test)]
mod test_support;

pub use client::{ClientOptions, DapClient, EventObserver, EventSubscription, RequestSubscription};
pub use codec::{Message, MessageCodec};
pub use config::{
    ClientSettings, ConfigurationCompound, ConfigurationSet, HoverSettings, LaunchConfiguration,
    LaunchRequest, LogSettings,
};
pub use error::{DapError, DapResult, ProtocolError};
pub use evaluate::{EvaluateContext, HoverController, HoverResult};
pub use protocol::{
    Capabilities, CompletionsArguments, ContinueArguments, ContinueResponseBody,
    ContinuedEventBody, DisconnectArguments, EvaluateArguments, Event, ExitedEventBody,
    InitializeArguments, MessageType, OutputEventBody, Request, Response, ScopesArguments,
    SetVariableArguments, Source,
    StackTraceArguments, StoppedEventBody, TerminatedEventBody, ThreadArguments, ThreadEventBody,
    VariablesArguments,
};
pub use session::{
    ContinuedNotification, DebugSession, OutputNotification, SessionPhase, StoppedNotification,
    TerminationCause, ThreadState,
};
pub use types::{
    CompletionItem, EvaluateResponse, Generation, Scope, StackFrame, StackFramePresentation,
    Thread, Variable, VariableRef, UNKNOWN_FILE,
};
pub use variables::VariableTree;
