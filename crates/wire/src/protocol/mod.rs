//! Protocol types shared by the decoder, the driver and the response writer.
//!
//! - [`message`]: [`Message`], [`PayloadItem`] and [`PayloadSize`], the items that flow
//!   through the codecs
//! - [`request`]: [`RequestHeader`], [`ClientInfo`], [`RequestContext`] and the
//!   [`RequestExt`] accessors
//! - [`response`]: [`ResponseHead`] and [`ResponseExt`] for preload hints
//! - [`body`]: the streaming [`body::RequestBody`]
//! - [`error`]: [`HttpError`], [`ParseError`] and [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::ClientInfo;
pub use request::RequestContext;
pub use request::RequestExt;
pub use request::RequestHeader;

mod response;
pub use response::PushHints;
pub use response::ResponseExt;
pub use response::ResponseHead;

mod error;
pub use error::BoxError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
