mod assets;
mod message;
mod state;

pub use assets::{download_file_name, AssetStatus, AssetStore};
pub use message::{ImageHandle, Message, Role};
pub use state::{ConversationState, Phase, WELCOME_MESSAGE};
