pub mod post;
pub mod prefs;
pub mod source;
pub mod subscription;

pub use post::{MediaItem, MediaKind, Post, QueuedPost};
pub use prefs::{Destination, FullTextStyle, PostStyle, UserPrefs};
pub use source::{normalize_username, Source};
pub use subscription::{text_passes_filters, DeliveryMode, Subscription};
