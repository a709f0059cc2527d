pub mod deployments;
pub mod retry;
pub mod settings;

pub use retry::{
    Poll,
    RetryError,
    RetryPolicy,
};
pub use settings::{
    BitrefillSettings,
    ConfigProvider,
    FileConfigStore,
    InMemoryConfigStore,
};
