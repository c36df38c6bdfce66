mod broadcaster;

pub use broadcaster::{SampleBroadcaster, SubscriberFilter, DEFAULT_CAPACITY};
