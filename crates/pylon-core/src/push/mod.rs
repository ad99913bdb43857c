//! Bidirectional push sessions over framed sockets.
//!
//! A [`PushSession`] wraps one framed socket for the lifetime of a client
//! connection, in one of two roles:
//!
//! - **Event**: asynchronous event fan-out, narrowed by a client-supplied
//!   [`PushFilter`]. Events enter through
//!   [`direct_push`](session::PushSession::direct_push) only.
//! - **API**: request/response dispatch over the same socket, one task per
//!   in-flight operation, with panic containment per operation.
//!
//! Each session runs three cooperating loops (read, write, control) and
//! unregisters itself exactly once on shutdown, whatever the cause.

pub mod codec;
pub mod dispatch;
pub mod event;
pub mod filter;
pub mod session;
pub mod socket;

pub use codec::{Codec, CodecError, JsonCodec};
pub use dispatch::{
    Auditer, Authorizer, DispatchContext, DispatchError, Operation, Payload, Processor,
    ProcessorFinder, ProcessorOutput, Request, RequestAuthenticator, Response,
};
pub use event::{Event, EventKind};
pub use filter::PushFilter;
pub use session::{PushSession, SessionRole};
pub use socket::{FrameSocket, SocketError};
