use tokio::sync::mpsc::error::SendError;
use tokio::sync::oneshot::error::RecvError;

pub enum Error<M> {
    SendError(SendError<M>),
    RecvError(RecvError),
}

impl<M> PartialEq for Error<M>
where
    M: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SendError(SendError(err)), Self::SendError(SendError(other_err))) => {
                err.eq(other_err)
            }
            (Self::RecvError(err), Self::RecvError(other_err)) => err.eq(other_err),
            _ => false,
        }
    }
}

impl<M> Eq for Error<M> where M: Eq {}

impl<M> From<SendError<M>> for Error<M> {
    fn from(err: SendError<M>) -> Self {
        Self::SendError(err)
    }
}

impl<M> From<RecvError> for Error<M> {
    fn from(err: RecvError) -> Self {
        Self::RecvError(err)
    }
}

impl<M> std::fmt::Debug for Error<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendError(_) => write!(f, "SendError(..)"),
            Self::RecvError(err) => write!(f, "RecvError({:?})", err),
        }
    }
}

impl<M> From<Error<M>> for crate::Error {
    fn from(value: Error<M>) -> Self {
        match value {
            Error::SendError(_) => crate::Error::new(
                "response_channel::SendError",
                "receiver dropped",
                crate::ErrorType::ChannelClosed,
            ),
            Error::RecvError(err) => err.into(),
        }
    }
}
