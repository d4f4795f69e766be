use tokio::sync::watch;

/// Stop signal shared between a worker handle and its background tasks.
#[derive(Clone)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> (StopSignal, Self) {
        let (tx, rx) = watch::channel(false);
        (StopSignal { sender: tx }, Self { receiver: rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender gone: the owning handle was dropped.
                break;
            }
        }
    }
}

pub struct StopSignal {
    sender: watch::Sender<bool>,
}

impl StopSignal {
    pub fn cancel(&self) {
        self.sender.send_if_modified(|stopped| {
            let changed = !*stopped;
            *stopped = true;
            changed
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}
