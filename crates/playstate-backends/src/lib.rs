pub mod context;
pub mod emby;
pub mod error;
pub mod factory;
pub mod jellyfin;
pub mod mediabrowser;
pub mod plex;
pub mod traits;

pub use context::BackendContext;
pub use emby::EmbyClient;
pub use error::BackendError;
pub use factory::{create_client, ClientRegistry};
pub use jellyfin::JellyfinClient;
pub use mediabrowser::{AccessTokenInfo, MediaBrowserHelper};
pub use plex::PlexClient;
pub use traits::{BackendClient, DiscoveredServer};
