//! Response side types.
//!
//! A response head is an `http::Response<()>`. The body travels separately
//! through a [`Producer`](crate::writer::Producer).

use http::{Response, Uri};

pub type ResponseHead = Response<()>;

/// Resources the application wants the client to preload, kept in the
/// response extensions until the head is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushHints(Vec<Uri>);

impl PushHints {
    pub fn iter(&self) -> impl Iterator<Item = &Uri> {
        self.0.iter()
    }
}

pub trait ResponseExt {
    /// Registers a server-push hint, sent as `Link: <uri>; rel=preload`.
    fn push(&mut self, uri: Uri);

    fn push_hints(&self) -> &[Uri];
}

impl<B> ResponseExt for Response<B> {
    fn push(&mut self, uri: Uri) {
        match self.extensions_mut().get_mut::<PushHints>() {
            Some(hints) => hints.0.push(uri),
            None => {
                self.extensions_mut().insert(PushHints(vec![uri]));
            }
        }
    }

    fn push_hints(&self) -> &[Uri] {
        self.extensions().get::<PushHints>().map_or(&[], |hints| hints.0.as_slice())
    }
}
