mod channel;
mod dispatcher;
mod email;
mod message;
mod push;

pub use channel::NotificationChannel;
pub use dispatcher::NotificationDispatcher;
pub use email::{EmailChannel, EmailConfig};
pub use push::{PushChannel, PushConfig};
