//! Request/reply messaging over a bounded mpsc queue.
//!
//! Every message carries its own oneshot reply slot, so clones of a
//! [`Sender`] never steal each other's replies.
pub mod response_error;

use std::ops::Deref;
use tokio::sync::{mpsc, oneshot};

pub type Receiver<M, R> = mpsc::Receiver<(M, oneshot::Sender<R>)>;

pub fn channel<M, R>(buffer: usize) -> (Sender<M, R>, Receiver<M, R>) {
    let (tx, rx) = mpsc::channel(buffer);
    (Sender { tx }, rx)
}

pub struct Sender<M, R> {
    pub(crate) tx: mpsc::Sender<(M, oneshot::Sender<R>)>,
}

impl<M, R> Sender<M, R> {
    /// Sends `message` and waits for the receiving side to reply.
    pub async fn send_await_automatic(&self, message: M) -> Result<R, response_error::Error<M>> {
        let reply = self.send_await(message).await?;
        Ok(reply.await?)
    }

    /// Sends `message` and returns the pending reply without waiting on it.
    pub async fn send_await(
        &self,
        message: M,
    ) -> Result<oneshot::Receiver<R>, response_error::Error<M>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((message, reply_tx))
            .await
            .map_err(|mpsc::error::SendError((m, _))| mpsc::error::SendError(m))?;
        Ok(reply_rx)
    }
}

impl<M, R> Clone for Sender<M, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M, R> Deref for Sender<M, R> {
    type Target = mpsc::Sender<(M, oneshot::Sender<R>)>;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_reach_the_right_clone() {
        let (sender, mut rx) = channel::<u32, u32>(4);
        tokio::spawn(async move {
            while let Some((m, reply)) = rx.recv().await {
                let _ = reply.send(m * 10);
            }
        });
        let other = sender.clone();
        let (a, b) = tokio::join!(
            sender.send_await_automatic(1),
            other.send_await_automatic(2)
        );
        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 20);
    }

    #[tokio::test]
    async fn closed_receiver_returns_message() {
        let (sender, rx) = channel::<&'static str, ()>(1);
        drop(rx);
        match sender.send_await_automatic("ping").await {
            Err(response_error::Error::SendError(mpsc::error::SendError(m))) => {
                assert_eq!(m, "ping")
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn dropped_reply_is_recv_error() {
        let (sender, mut rx) = channel::<u8, u8>(1);
        tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        assert!(matches!(
            sender.send_await_automatic(1).await,
            Err(response_error::Error::RecvError(_))
        ));
    }
}
